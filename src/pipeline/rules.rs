//! Rule engine — maps a classification to a configured action.
//!
//! Rules are evaluated in configuration order; the first rule whose
//! conditions all hold wins. Conditions within a rule are conjunctive.
//! A rule with no conditions never matches.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::types::Classification;
use crate::config::RuleConfig;
use crate::pipeline::types::{ActionKind, MailMessage};

/// The winning rule plus the evidence of why it matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_name: String,
    pub action: ActionKind,
    pub auto_send: bool,
    pub template: Option<String>,
    /// Condition-name / matched-value pairs, e.g. `("intent", "spam == spam")`.
    pub conditions_matched: Vec<(String, String)>,
}

/// Ordered, first-match-wins rule evaluator.
pub struct RuleEngine {
    rules: Vec<RuleConfig>,
}

impl RuleEngine {
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self { rules }
    }

    /// Evaluate rules in order and return the first full match, if any.
    pub fn matches(
        &self,
        message: &MailMessage,
        classification: &Classification,
    ) -> Option<MatchedRule> {
        for rule in &self.rules {
            if let Some(matched) = evaluate_rule(rule, message, classification) {
                debug!(
                    rule = %matched.rule_name,
                    action = %matched.action.label(),
                    "Rule matched"
                );
                return Some(matched);
            }
        }
        None
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// All conditions must hold; a rule with none never matches.
fn evaluate_rule(
    rule: &RuleConfig,
    message: &MailMessage,
    classification: &Classification,
) -> Option<MatchedRule> {
    if rule.conditions.is_empty() {
        return None;
    }

    let mut conditions_matched = Vec::new();

    if let Some(want) = rule.conditions.intent {
        if classification.intent != want {
            return None;
        }
        conditions_matched.push((
            "intent".to_string(),
            format!("{} == {}", classification.intent.label(), want.label()),
        ));
    }

    if let Some(want) = rule.conditions.priority {
        if classification.priority != want {
            return None;
        }
        conditions_matched.push((
            "priority".to_string(),
            format!("{} == {}", classification.priority.label(), want.label()),
        ));
    }

    if let Some(min) = rule.conditions.confidence_min {
        if classification.confidence < min {
            return None;
        }
        conditions_matched.push((
            "confidence_min".to_string(),
            format!("{} >= {min}", classification.confidence),
        ));
    }

    if let Some(ref fragment) = rule.conditions.sender_contains {
        if !contains_ignore_case(&message.from_address, fragment) {
            return None;
        }
        conditions_matched.push((
            "sender_contains".to_string(),
            format!("'{fragment}' in '{}'", message.from_address),
        ));
    }

    if let Some(ref fragment) = rule.conditions.subject_contains {
        if !contains_ignore_case(&message.subject, fragment) {
            return None;
        }
        conditions_matched.push((
            "subject_contains".to_string(),
            format!("'{fragment}' in '{}'", message.subject),
        ));
    }

    Some(MatchedRule {
        rule_name: rule.name.clone(),
        action: rule.action,
        auto_send: rule.auto_send,
        template: rule.template.clone(),
        conditions_matched,
    })
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::classify::types::{Intent, Priority};
    use crate::config::RuleConditions;

    fn make_message(from: &str, subject: &str) -> MailMessage {
        MailMessage {
            id: "uid-1".into(),
            from_address: from.into(),
            to_address: "agent@example.com".into(),
            subject: subject.into(),
            body: "body".into(),
            date: Utc::now(),
            message_id: Some("<m1>".into()),
            in_reply_to: None,
            references: vec![],
            thread_context: vec![],
        }
    }

    fn make_classification(intent: Intent, priority: Priority, confidence: f32) -> Classification {
        Classification::new(intent, priority, confidence)
    }

    fn rule(name: &str, conditions: RuleConditions, action: ActionKind) -> RuleConfig {
        RuleConfig {
            name: name.into(),
            conditions,
            action,
            auto_send: false,
            template: None,
        }
    }

    #[test]
    fn spam_rule_matches_on_intent() {
        let engine = RuleEngine::new(vec![rule(
            "Spam",
            RuleConditions {
                intent: Some(Intent::Spam),
                ..Default::default()
            },
            ActionKind::Ignore,
        )]);

        let msg = make_message("ads@spam.example", "Win big now");
        let cls = make_classification(Intent::Spam, Priority::Low, 0.98);

        let matched = engine.matches(&msg, &cls).expect("should match");
        assert_eq!(matched.rule_name, "Spam");
        assert_eq!(matched.action, ActionKind::Ignore);
        assert_eq!(
            matched.conditions_matched,
            vec![("intent".to_string(), "spam == spam".to_string())]
        );
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let engine = RuleEngine::new(vec![
            rule(
                "First",
                RuleConditions {
                    intent: Some(Intent::Spam),
                    ..Default::default()
                },
                ActionKind::Ignore,
            ),
            rule(
                "Second",
                RuleConditions {
                    intent: Some(Intent::Spam),
                    priority: Some(Priority::Low),
                    ..Default::default()
                },
                ActionKind::Flag,
            ),
        ]);

        let msg = make_message("ads@spam.example", "Deal");
        let cls = make_classification(Intent::Spam, Priority::Low, 0.9);
        assert_eq!(engine.matches(&msg, &cls).unwrap().rule_name, "First");
    }

    #[test]
    fn conditions_are_conjunctive() {
        let engine = RuleEngine::new(vec![rule(
            "UrgentFromBoss",
            RuleConditions {
                priority: Some(Priority::High),
                sender_contains: Some("boss@".into()),
                ..Default::default()
            },
            ActionKind::Flag,
        )]);

        let cls = make_classification(Intent::UrgentIssue, Priority::High, 0.9);

        // Priority matches but sender does not.
        let msg = make_message("peer@example.com", "Help");
        assert!(engine.matches(&msg, &cls).is_none());

        let msg = make_message("Boss@Example.com", "Help");
        let matched = engine.matches(&msg, &cls).expect("should match");
        assert_eq!(matched.conditions_matched.len(), 2);
    }

    #[test]
    fn confidence_min_is_inclusive() {
        let engine = RuleEngine::new(vec![rule(
            "Confident",
            RuleConditions {
                confidence_min: Some(0.8),
                ..Default::default()
            },
            ActionKind::Archive,
        )]);

        let msg = make_message("x@example.com", "Subject");
        assert!(
            engine
                .matches(&msg, &make_classification(Intent::Newsletter, Priority::Low, 0.8))
                .is_some()
        );
        assert!(
            engine
                .matches(&msg, &make_classification(Intent::Newsletter, Priority::Low, 0.79))
                .is_none()
        );
    }

    #[test]
    fn substring_conditions_ignore_case() {
        let engine = RuleEngine::new(vec![rule(
            "Invoices",
            RuleConditions {
                subject_contains: Some("INVOICE".into()),
                ..Default::default()
            },
            ActionKind::Flag,
        )]);

        let msg = make_message("billing@vendor.example", "Your invoice #42");
        let cls = make_classification(Intent::ActionRequired, Priority::Medium, 0.7);
        assert!(engine.matches(&msg, &cls).is_some());
    }

    #[test]
    fn empty_conditions_never_match() {
        let engine = RuleEngine::new(vec![rule(
            "CatchAll",
            RuleConditions::default(),
            ActionKind::Ignore,
        )]);

        let msg = make_message("x@example.com", "Anything");
        let cls = make_classification(Intent::Spam, Priority::Low, 0.99);
        assert!(engine.matches(&msg, &cls).is_none());
    }

    #[test]
    fn matching_is_deterministic() {
        let engine = RuleEngine::new(vec![rule(
            "Meetings",
            RuleConditions {
                intent: Some(Intent::MeetingRequest),
                confidence_min: Some(0.8),
                ..Default::default()
            },
            ActionKind::Reply,
        )]);

        let msg = make_message("client@example.com", "Sync tomorrow?");
        let cls = make_classification(Intent::MeetingRequest, Priority::Medium, 0.9);

        let first = engine.matches(&msg, &cls).expect("should match");
        let second = engine.matches(&msg, &cls).expect("should match");
        assert_eq!(first, second);
    }

    #[test]
    fn no_match_returns_none() {
        let engine = RuleEngine::new(vec![rule(
            "Spam",
            RuleConditions {
                intent: Some(Intent::Spam),
                ..Default::default()
            },
            ActionKind::Ignore,
        )]);

        let msg = make_message("client@example.com", "Meeting");
        let cls = make_classification(Intent::MeetingRequest, Priority::Medium, 0.9);
        assert!(engine.matches(&msg, &cls).is_none());
    }
}
