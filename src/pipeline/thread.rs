//! Thread resolver — reconstructs prior conversation context from
//! message headers.
//!
//! Strategy order, stopping at the first that yields anything:
//! 1. Walk the References chain, fetching each ancestor by Message-ID
//! 2. Fetch the direct parent named by In-Reply-To
//! 3. Search by normalized subject, filtered to exact subject matches
//!
//! Transport failures are never fatal — resolution degrades to an empty
//! context with a warning.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::pipeline::types::{MailMessage, ThreadMessage};
use crate::transport::{Mailbox, normalize_subject};

/// Maximum thread depth the resolver will ever return.
pub const MAX_THREAD_DEPTH: usize = 10;

/// Minimum normalized-subject length for the fallback search.
const MIN_SUBJECT_SEARCH_LEN: usize = 5;

/// Resolves prior messages in a conversation thread.
pub struct ThreadResolver {
    mailbox: Arc<dyn Mailbox>,
}

impl ThreadResolver {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }

    /// Resolve up to `depth_limit` prior messages for `message`,
    /// oldest first. Never fails.
    pub async fn resolve(&self, message: &MailMessage, depth_limit: usize) -> Vec<ThreadMessage> {
        let depth = depth_limit.min(MAX_THREAD_DEPTH);
        if depth == 0 {
            return Vec::new();
        }

        // Not a reply: resolve empty without touching the transport at
        // all. A Message-ID alone links nothing backwards.
        if !message.is_part_of_thread() {
            return Vec::new();
        }

        let mut seen: HashSet<String> = HashSet::new();
        if let Some(ref own_id) = message.message_id {
            seen.insert(own_id.trim().to_string());
        }

        let mut found = self.search_references(message, depth, &mut seen).await;

        if found.is_empty()
            && let Some(ref parent_id) = message.in_reply_to
        {
            found = self.fetch_one(parent_id, &mut seen).await;
        }

        if found.is_empty() {
            found = self.search_subject(message, depth, &mut seen).await;
        }

        let resolved = sort_and_limit(found, depth);
        debug!(
            id = %message.id,
            count = resolved.len(),
            "Thread context resolved"
        );
        resolved
    }

    /// Strategy 1: walk the References chain in header order.
    async fn search_references(
        &self,
        message: &MailMessage,
        depth: usize,
        seen: &mut HashSet<String>,
    ) -> Vec<ThreadMessage> {
        let mut found = Vec::new();

        for ref_id in &message.references {
            let ref_id = ref_id.trim();
            if ref_id.is_empty() || seen.contains(ref_id) {
                continue;
            }
            found.extend(self.fetch_one(ref_id, seen).await);
            if found.len() >= depth {
                break;
            }
        }

        found
    }

    /// Fetch a single ancestor by Message-ID; misses and errors yield nothing.
    async fn fetch_one(&self, message_id: &str, seen: &mut HashSet<String>) -> Vec<ThreadMessage> {
        match self.mailbox.fetch_by_message_id(message_id.trim()).await {
            Ok(Some(msg)) => {
                if let Some(mid) = msg.message_id.as_deref().map(str::trim) {
                    if seen.contains(mid) {
                        return Vec::new();
                    }
                    seen.insert(mid.to_string());
                }
                vec![ThreadMessage::from_message(&msg)]
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(message_id, error = %e, "Thread fetch failed, continuing without");
                Vec::new()
            }
        }
    }

    /// Strategy 3: subject fallback, filtered to exact normalized matches.
    async fn search_subject(
        &self,
        message: &MailMessage,
        depth: usize,
        seen: &mut HashSet<String>,
    ) -> Vec<ThreadMessage> {
        let clean_subject = normalize_subject(&message.subject);
        if clean_subject.len() < MIN_SUBJECT_SEARCH_LEN {
            return Vec::new();
        }

        let candidates = match self.mailbox.search_by_subject(&clean_subject).await {
            Ok(msgs) => msgs,
            Err(e) => {
                warn!(error = %e, "Subject-based thread search failed");
                return Vec::new();
            }
        };

        let clean_lower = clean_subject.to_lowercase();
        let mut found = Vec::new();
        for msg in candidates {
            if found.len() >= depth {
                break;
            }
            if let Some(mid) = msg.message_id.as_deref().map(str::trim)
                && seen.contains(mid)
            {
                continue;
            }
            // SUBJECT search is substring-based; keep exact matches only.
            if normalize_subject(&msg.subject).to_lowercase() != clean_lower {
                continue;
            }
            if let Some(mid) = msg.message_id.as_deref().map(str::trim) {
                seen.insert(mid.to_string());
            }
            found.push(ThreadMessage::from_message(&msg));
        }

        found
    }
}

/// Sort oldest-first (unparseable dates first), dedup by message id, and
/// keep only the most recent `depth` entries.
fn sort_and_limit(mut messages: Vec<ThreadMessage>, depth: usize) -> Vec<ThreadMessage> {
    if messages.is_empty() {
        return messages;
    }

    let mut seen = HashSet::new();
    messages.retain(|msg| msg.message_id.is_empty() || seen.insert(msg.message_id.clone()));

    messages.sort_by_key(|msg| parse_date_or_min(&msg.date));

    if messages.len() > depth {
        messages.drain(..messages.len() - depth);
    }
    messages
}

fn parse_date_or_min(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
