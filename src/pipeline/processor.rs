//! Per-message orchestration: resolve thread, classify, match rules,
//! check safety, dispatch the action, record what happened.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::classify::Classifier;
use crate::pipeline::actions::ActionDispatcher;
use crate::pipeline::rules::RuleEngine;
use crate::pipeline::safety::SafetyGate;
use crate::pipeline::thread::ThreadResolver;
use crate::pipeline::types::{MailMessage, Outcome, ProcessingRecord};

pub struct MessageProcessor {
    resolver: ThreadResolver,
    classifier: Arc<dyn Classifier>,
    rules: RuleEngine,
    safety: Arc<SafetyGate>,
    dispatcher: ActionDispatcher,
    thread_depth: usize,
}

impl MessageProcessor {
    pub fn new(
        resolver: ThreadResolver,
        classifier: Arc<dyn Classifier>,
        rules: RuleEngine,
        safety: Arc<SafetyGate>,
        dispatcher: ActionDispatcher,
        thread_depth: usize,
    ) -> Self {
        Self {
            resolver,
            classifier,
            rules,
            safety,
            dispatcher,
            thread_depth,
        }
    }

    /// Process one message end to end. Never fails: every path produces a
    /// `ProcessingRecord`.
    pub async fn process(&self, mut message: MailMessage) -> ProcessingRecord {
        info!(
            id = %message.id,
            from = %message.from_address,
            subject = %message.subject,
            "Processing message"
        );

        message.thread_context = self.resolver.resolve(&message, self.thread_depth).await;

        // Exactly one classification per message; failures inside the
        // classifier already degrade to the zero-confidence fallback.
        let mut classification = self.classifier.classify(&message).await;
        if let Some(suggestion) = self
            .classifier
            .suggest_action(&message, &classification)
            .await
        {
            classification.suggestion = Some(suggestion);
        }

        let Some(matched_rule) = self.rules.matches(&message, &classification) else {
            info!(id = %message.id, "No rule matched, skipping");
            return ProcessingRecord {
                message_id: message.id.clone(),
                from_address: message.from_address.clone(),
                subject: message.subject.clone(),
                classification: Some(classification),
                matched_rule: None,
                safety: None,
                outcome: Outcome::Skipped,
                reply: None,
                thread_depth: message.thread_depth(),
                timestamp: Utc::now(),
                success: true,
                error: None,
            };
        };

        let decision = self.safety.evaluate(&classification, Some(&matched_rule));

        let (outcome, reply) = self
            .dispatcher
            .dispatch(&message, &classification, &matched_rule, &decision)
            .await;

        if outcome == Outcome::Error {
            error!(id = %message.id, rule = %matched_rule.rule_name, "Action failed");
        } else {
            info!(
                id = %message.id,
                rule = %matched_rule.rule_name,
                outcome = outcome.label(),
                "Message processed"
            );
        }

        ProcessingRecord {
            message_id: message.id.clone(),
            from_address: message.from_address.clone(),
            subject: message.subject.clone(),
            classification: Some(classification),
            matched_rule: Some(matched_rule),
            safety: Some(decision),
            outcome,
            reply,
            thread_depth: message.thread_depth(),
            timestamp: Utc::now(),
            success: outcome != Outcome::Error,
            error: match outcome {
                Outcome::Error => Some("action failed".to_string()),
                _ => None,
            },
        }
    }

    /// Process a batch sequentially. One message's failure never aborts
    /// the rest.
    pub async fn process_batch(&self, messages: Vec<MailMessage>) -> Vec<ProcessingRecord> {
        let total = messages.len();
        let mut records = Vec::with_capacity(total);
        for (i, message) in messages.into_iter().enumerate() {
            info!(position = i + 1, total, "Batch progress");
            records.push(self.process(message).await);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::classify::types::{ActionSuggestion, Classification, Intent, Priority};
    use crate::config::{RuleConditions, RuleConfig, SafetyConfig};
    use crate::error::TransportError;
    use crate::pipeline::types::ActionKind;
    use crate::transport::Mailbox;

    struct NullMailbox;

    #[async_trait]
    impl Mailbox for NullMailbox {
        async fn fetch_by_message_id(
            &self,
            _message_id: &str,
        ) -> Result<Option<MailMessage>, TransportError> {
            Ok(None)
        }
        async fn search_by_subject(
            &self,
            _subject: &str,
        ) -> Result<Vec<MailMessage>, TransportError> {
            Ok(vec![])
        }
        async fn send_reply(
            &self,
            _to: &str,
            _subject: &str,
            _body: &str,
            _in_reply_to: Option<&str>,
            _references: &[String],
        ) -> Result<(), TransportError> {
            Ok(())
        }
        async fn save_draft(
            &self,
            _to: &str,
            _subject: &str,
            _body: &str,
            _in_reply_to: Option<&str>,
            _references: &[String],
        ) -> Result<(), TransportError> {
            Ok(())
        }
        async fn archive(&self, _id: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn flag(&self, _id: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct FixedClassifier {
        classification: Classification,
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _message: &MailMessage) -> Classification {
            self.classification.clone()
        }
        async fn suggest_action(
            &self,
            _message: &MailMessage,
            _classification: &Classification,
        ) -> Option<ActionSuggestion> {
            None
        }
    }

    struct NoReply;

    #[async_trait]
    impl crate::classify::ReplyGenerator for NoReply {
        async fn generate(
            &self,
            _message: &MailMessage,
            _classification: &Classification,
            _template: Option<&str>,
        ) -> Option<String> {
            None
        }
    }

    fn processor(classification: Classification, rules: Vec<RuleConfig>) -> MessageProcessor {
        let mailbox: Arc<dyn Mailbox> = Arc::new(NullMailbox);
        let safety = Arc::new(SafetyGate::new(SafetyConfig {
            dry_run: false,
            confidence_threshold: 0.85,
            max_sends_per_hour: 20,
        }));
        MessageProcessor::new(
            ThreadResolver::new(Arc::clone(&mailbox)),
            Arc::new(FixedClassifier { classification }),
            RuleEngine::new(rules),
            Arc::clone(&safety),
            ActionDispatcher::new(
                mailbox,
                Arc::new(NoReply),
                safety,
                Default::default(),
                false,
            ),
            5,
        )
    }

    fn message(id: &str) -> MailMessage {
        MailMessage {
            id: id.into(),
            from_address: "sender@example.com".into(),
            to_address: "agent@example.com".into(),
            subject: "Hello there".into(),
            body: "body".into(),
            date: Utc::now(),
            message_id: None,
            in_reply_to: None,
            references: vec![],
            thread_context: vec![],
        }
    }

    fn spam_rule() -> RuleConfig {
        RuleConfig {
            name: "Spam".into(),
            conditions: RuleConditions {
                intent: Some(Intent::Spam),
                ..Default::default()
            },
            action: ActionKind::Ignore,
            auto_send: false,
            template: None,
        }
    }

    #[tokio::test]
    async fn unmatched_message_is_skipped_with_classification() {
        let p = processor(
            Classification::new(Intent::GeneralInquiry, Priority::Medium, 0.9),
            vec![spam_rule()],
        );

        let record = p.process(message("m1")).await;
        assert_eq!(record.outcome, Outcome::Skipped);
        assert!(record.success);
        assert!(record.classification.is_some());
        assert!(record.matched_rule.is_none());
        assert!(record.safety.is_none());
    }

    #[tokio::test]
    async fn matched_message_carries_rule_and_decision() {
        let p = processor(
            Classification::new(Intent::Spam, Priority::Low, 0.98),
            vec![spam_rule()],
        );

        let record = p.process(message("m1")).await;
        assert_eq!(record.outcome, Outcome::Ignored);
        assert_eq!(record.matched_rule.as_ref().unwrap().rule_name, "Spam");
        assert!(record.safety.is_some());
    }

    #[tokio::test]
    async fn batch_survives_per_message_errors() {
        // Reply action paired with a generator that always fails: each
        // record is an Error but the batch still completes.
        let p = processor(
            Classification::new(Intent::GeneralInquiry, Priority::Medium, 0.95),
            vec![RuleConfig {
                name: "ReplyAll".into(),
                conditions: RuleConditions {
                    confidence_min: Some(0.5),
                    ..Default::default()
                },
                action: ActionKind::Reply,
                auto_send: false,
                template: None,
            }],
        );

        let records = p.process_batch(vec![message("m1"), message("m2")]).await;
        assert_eq!(records.len(), 2);
        for record in records {
            assert_eq!(record.outcome, Outcome::Error);
            assert!(!record.success);
        }
    }
}
