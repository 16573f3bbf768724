//! Shared types for the triage pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::types::Classification;
use crate::pipeline::rules::MatchedRule;
use crate::pipeline::safety::SafetyDecision;

// ── Mail message ────────────────────────────────────────────────────

/// A single message fetched from the mailbox.
///
/// Created by the transport when a message is fetched; `thread_context` is
/// filled in place by the `ThreadResolver` and read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    /// Mailbox-native identifier (IMAP UID).
    pub id: String,
    /// Sender, e.g. "John Doe <john@company.com>".
    pub from_address: String,
    /// Recipient address.
    pub to_address: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// When the message was received.
    pub date: DateTime<Utc>,
    /// RFC Message-ID header, used for threading.
    pub message_id: Option<String>,
    /// Message-ID this message replies to.
    pub in_reply_to: Option<String>,
    /// Ancestor Message-ID chain from the References header, in header order.
    #[serde(default)]
    pub references: Vec<String>,
    /// Prior messages in this thread, oldest first.
    ///
    /// Invariant: never contains this message's own `message_id` and is
    /// duplicate-free by message id.
    #[serde(default)]
    pub thread_context: Vec<ThreadMessage>,
}

impl MailMessage {
    /// Whether this message is a reply: it names a parent via In-Reply-To
    /// or carries an ancestor References chain. A bare Message-ID does not
    /// count.
    pub fn is_part_of_thread(&self) -> bool {
        self.in_reply_to.is_some() || !self.references.is_empty()
    }

    /// Number of prior messages resolved for this thread.
    pub fn thread_depth(&self) -> usize {
        self.thread_context.len()
    }
}

/// A reduced projection of a prior message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub sender: String,
    pub subject: String,
    /// Body truncated to 500 chars for context.
    pub body: String,
    /// Raw date header; may be unparseable (sorts first if so).
    pub date: String,
    pub message_id: String,
}

impl ThreadMessage {
    /// Build a context projection from a full message.
    pub fn from_message(msg: &MailMessage) -> Self {
        Self {
            sender: msg.from_address.clone(),
            subject: msg.subject.clone(),
            body: msg.body.chars().take(500).collect(),
            date: msg.date.to_rfc2822(),
            message_id: msg.message_id.clone().unwrap_or_default(),
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// Closed set of actions a rule can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Reply,
    DraftReply,
    Archive,
    Flag,
    FlagAndDraft,
    Ignore,
}

impl ActionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reply" => Some(Self::Reply),
            "draft_reply" => Some(Self::DraftReply),
            "archive" => Some(Self::Archive),
            "flag" => Some(Self::Flag),
            "flag_and_draft" => Some(Self::FlagAndDraft),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::DraftReply => "draft_reply",
            Self::Archive => "archive",
            Self::Flag => "flag",
            Self::FlagAndDraft => "flag_and_draft",
            Self::Ignore => "ignore",
        }
    }

    /// Actions with no irreversible external effect. These bypass the
    /// rate-limit check on the execute gate.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Ignore | Self::Flag | Self::FlagAndDraft)
    }
}

/// What actually happened when an action was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    ReplySent,
    DraftSaved,
    Flagged,
    FlaggedAndDrafted,
    Archived,
    Ignored,
    Skipped,
    Error,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReplySent => "reply_sent",
            Self::DraftSaved => "draft_saved",
            Self::Flagged => "flagged",
            Self::FlaggedAndDrafted => "flagged_and_drafted",
            Self::Archived => "archived",
            Self::Ignored => "ignored",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

// ── Processing record ───────────────────────────────────────────────

/// Complete record of what happened when one message was processed.
/// This is what the audit trail consumes.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    pub message_id: String,
    pub from_address: String,
    pub subject: String,
    pub classification: Option<Classification>,
    pub matched_rule: Option<MatchedRule>,
    pub safety: Option<SafetyDecision>,
    pub outcome: Outcome,
    /// Generated reply text, if one was produced.
    pub reply: Option<String>,
    pub thread_depth: usize,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message() -> MailMessage {
        MailMessage {
            id: "42".into(),
            from_address: "alice@example.com".into(),
            to_address: "agent@example.com".into(),
            subject: "Hello".into(),
            body: "Hi there".into(),
            date: Utc::now(),
            message_id: Some("<m1@example.com>".into()),
            in_reply_to: None,
            references: vec![],
            thread_context: vec![],
        }
    }

    #[test]
    fn action_kind_round_trips_labels() {
        for action in [
            ActionKind::Reply,
            ActionKind::DraftReply,
            ActionKind::Archive,
            ActionKind::Flag,
            ActionKind::FlagAndDraft,
            ActionKind::Ignore,
        ] {
            assert_eq!(ActionKind::parse(action.label()), Some(action));
        }
        assert_eq!(ActionKind::parse("explode"), None);
    }

    #[test]
    fn safe_set_membership() {
        assert!(ActionKind::Ignore.is_safe());
        assert!(ActionKind::Flag.is_safe());
        assert!(ActionKind::FlagAndDraft.is_safe());
        assert!(!ActionKind::Reply.is_safe());
        assert!(!ActionKind::DraftReply.is_safe());
        assert!(!ActionKind::Archive.is_safe());
    }

    #[test]
    fn message_without_links_is_not_threaded() {
        let msg = make_message();
        assert!(!msg.is_part_of_thread());
        assert_eq!(msg.thread_depth(), 0);
    }

    #[test]
    fn message_with_in_reply_to_is_threaded() {
        let mut msg = make_message();
        msg.in_reply_to = Some("<parent@example.com>".into());
        assert!(msg.is_part_of_thread());
    }

    #[test]
    fn thread_message_truncates_body() {
        let mut msg = make_message();
        msg.body = "x".repeat(900);
        let tm = ThreadMessage::from_message(&msg);
        assert_eq!(tm.body.len(), 500);
        assert_eq!(tm.message_id, "<m1@example.com>");
    }

    #[test]
    fn outcome_labels_are_distinct() {
        // `error` and `skipped` must be reported distinctly.
        assert_ne!(Outcome::Error.label(), Outcome::Skipped.label());
    }
}
