//! Classification data model.
//!
//! These types define the shape of what the external reasoning service
//! returns. Parsing is lenient by design: unknown intents and priorities
//! fall back to safe defaults instead of failing the message.

use serde::{Deserialize, Serialize};

/// Categorical judgment of a message's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    MeetingRequest,
    Newsletter,
    UrgentIssue,
    Spam,
    GeneralInquiry,
    FollowUp,
    Complaint,
    ActionRequired,
}

impl Intent {
    /// Parse a classifier string; unknown values default to `GeneralInquiry`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "meeting_request" => Self::MeetingRequest,
            "newsletter" => Self::Newsletter,
            "urgent_issue" => Self::UrgentIssue,
            "spam" => Self::Spam,
            "general_inquiry" => Self::GeneralInquiry,
            "follow_up" => Self::FollowUp,
            "complaint" => Self::Complaint,
            "action_required" => Self::ActionRequired,
            other => {
                tracing::warn!("Unknown intent '{other}', defaulting to 'general_inquiry'");
                Self::GeneralInquiry
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::MeetingRequest => "meeting_request",
            Self::Newsletter => "newsletter",
            Self::UrgentIssue => "urgent_issue",
            Self::Spam => "spam",
            Self::GeneralInquiry => "general_inquiry",
            Self::FollowUp => "follow_up",
            Self::Complaint => "complaint",
            Self::ActionRequired => "action_required",
        }
    }
}

/// Message priority as judged by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse a classifier string; unknown values default to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Entities extracted from the message body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityBag {
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

/// Structured action suggestion from the secondary suggestion call.
///
/// Annotation only — it never overrides the primary suggested action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSuggestion {
    pub action_type: String,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub reply_template_hint: String,
}

/// Action tags a suggestion may carry.
const VALID_SUGGESTION_ACTIONS: &[&str] = &[
    "reply",
    "draft_reply",
    "archive",
    "flag",
    "ignore",
    "flag_and_draft",
];

impl ActionSuggestion {
    /// Build from a raw JSON value, returning `None` on anything invalid.
    pub fn safe_from_value(value: &serde_json::Value) -> Option<Self> {
        let mut suggestion: Self = serde_json::from_value(value.clone()).ok()?;
        if !VALID_SUGGESTION_ACTIONS.contains(&suggestion.action_type.as_str()) {
            return None;
        }
        suggestion.confidence = suggestion.confidence.clamp(0.0, 1.0);
        Some(suggestion)
    }
}

/// AI classification of a mail message.
///
/// Created once per message by the `Classifier`; immutable afterward except
/// for the optional `suggestion` annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub priority: Priority,
    /// Always clamped to [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub entities: EntityBag,
    #[serde(default)]
    pub suggested_action: String,
    #[serde(default)]
    pub reasoning: String,
    /// Secondary structured suggestion, if the suggestion call produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<ActionSuggestion>,
}

impl Classification {
    pub fn new(intent: Intent, priority: Priority, confidence: f32) -> Self {
        Self {
            intent,
            priority,
            confidence: confidence.clamp(0.0, 1.0),
            entities: EntityBag::default(),
            suggested_action: "none".into(),
            reasoning: String::new(),
            suggestion: None,
        }
    }

    /// Safe fallback used when classification fails entirely.
    ///
    /// Zero confidence guarantees the safety gate blocks every non-safe
    /// action downstream.
    pub fn fallback(error_msg: &str) -> Self {
        Self {
            intent: Intent::GeneralInquiry,
            priority: Priority::Medium,
            confidence: 0.0,
            entities: EntityBag::default(),
            suggested_action: "none".into(),
            reasoning: format!("Fallback classification due to error: {error_msg}"),
            suggestion: None,
        }
    }

    /// The best action signal available. The primary suggested action always
    /// takes precedence; the suggestion is a secondary signal only.
    pub fn effective_action(&self) -> &str {
        if !self.suggested_action.is_empty() && self.suggested_action != "none" {
            return &self.suggested_action;
        }
        if let Some(ref suggestion) = self.suggestion {
            return &suggestion.action_type;
        }
        "none"
    }
}
