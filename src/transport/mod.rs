//! Mailbox transport abstraction.
//!
//! The pipeline core only ever talks to the `Mailbox` trait; the IMAP/SMTP
//! implementation lives in [`imap`]. Search operations treat not-found as an
//! empty result, never an error.

pub mod imap;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::pipeline::types::MailMessage;

/// Abstract mailbox collaborators: search (thread resolution) plus the
/// side-effecting operations the action handlers need.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch the message whose Message-ID header matches `message_id`.
    async fn fetch_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<MailMessage>, TransportError>;

    /// Search for messages by normalized subject. The IMAP SUBJECT search is
    /// substring-based; callers filter for exact subject matches.
    async fn search_by_subject(
        &self,
        subject: &str,
    ) -> Result<Vec<MailMessage>, TransportError>;

    /// Send a reply via SMTP, with threading headers.
    async fn send_reply(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
        references: &[String],
    ) -> Result<(), TransportError>;

    /// Save a reply to the drafts folder instead of sending it.
    async fn save_draft(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
        references: &[String],
    ) -> Result<(), TransportError>;

    /// Archive a message out of the inbox.
    async fn archive(&self, id: &str) -> Result<(), TransportError>;

    /// Flag a message for attention.
    async fn flag(&self, id: &str) -> Result<(), TransportError>;
}

// ── Address / subject helpers ───────────────────────────────────────

/// Extract a clean address from a From field.
///
/// `"John Doe <john@company.com>"` → `"john@company.com"`.
pub fn extract_email_address(from_field: &str) -> &str {
    if let (Some(start), Some(end)) = (from_field.find('<'), from_field.rfind('>'))
        && end > start
    {
        return from_field[start + 1..end].trim();
    }
    from_field.trim()
}

/// Build a reply subject, avoiding "Re: Re:" stacking.
pub fn make_reply_subject(original: &str) -> String {
    if original.to_lowercase().starts_with("re:") {
        original.to_string()
    } else {
        format!("Re: {original}")
    }
}

/// Strip reply/forward prefixes ("Re:", "Fwd:", "Fw:", case-insensitive)
/// from a subject, repeatedly, and trim whitespace.
pub fn normalize_subject(subject: &str) -> String {
    let mut current = subject.trim();
    loop {
        let lower = current.to_lowercase();
        let stripped = if lower.starts_with("re:") {
            &current[3..]
        } else if lower.starts_with("fwd:") {
            &current[4..]
        } else if lower.starts_with("fw:") {
            &current[3..]
        } else {
            break;
        };
        current = stripped.trim_start();
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_address_from_display_form() {
        assert_eq!(
            extract_email_address("John Doe <john@company.com>"),
            "john@company.com"
        );
    }

    #[test]
    fn bare_address_passes_through() {
        assert_eq!(extract_email_address("john@company.com"), "john@company.com");
    }

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(make_reply_subject("Meeting Friday"), "Re: Meeting Friday");
        assert_eq!(make_reply_subject("Re: Meeting Friday"), "Re: Meeting Friday");
        assert_eq!(make_reply_subject("RE: Meeting"), "RE: Meeting");
    }

    #[test]
    fn normalizes_stacked_prefixes() {
        assert_eq!(normalize_subject("Re: Fwd: Budget plan"), "Budget plan");
        assert_eq!(normalize_subject("FW: re: Hello"), "Hello");
        assert_eq!(normalize_subject("  Quarterly review "), "Quarterly review");
    }

    #[test]
    fn normalize_leaves_plain_subject_alone() {
        assert_eq!(normalize_subject("Regarding the offer"), "Regarding the offer");
    }
}
