//! Action handlers and dispatch.
//!
//! Each `ActionKind` maps to a handler; handlers never fail — transport
//! and generation problems surface as `Outcome::Error` instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::classify::reply::ReplyGenerator;
use crate::classify::types::Classification;
use crate::pipeline::rules::MatchedRule;
use crate::pipeline::safety::{SafetyDecision, SafetyGate};
use crate::pipeline::types::{ActionKind, MailMessage, Outcome};
use crate::transport::{Mailbox, extract_email_address, make_reply_subject};

/// Executes one kind of action for a message.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        message: &MailMessage,
        classification: &Classification,
        matched_rule: &MatchedRule,
        decision: &SafetyDecision,
    ) -> (Outcome, Option<String>);
}

/// Ignore: do nothing, record it.
struct IgnoreHandler;

#[async_trait]
impl ActionHandler for IgnoreHandler {
    async fn execute(
        &self,
        message: &MailMessage,
        _classification: &Classification,
        _matched_rule: &MatchedRule,
        _decision: &SafetyDecision,
    ) -> (Outcome, Option<String>) {
        info!(id = %message.id, "Message ignored");
        (Outcome::Ignored, None)
    }
}

/// Flag the message for human attention. A transport failure still counts
/// as flagged; the record matters more than the mailbox star.
struct FlagHandler {
    mailbox: Arc<dyn Mailbox>,
}

#[async_trait]
impl ActionHandler for FlagHandler {
    async fn execute(
        &self,
        message: &MailMessage,
        _classification: &Classification,
        _matched_rule: &MatchedRule,
        decision: &SafetyDecision,
    ) -> (Outcome, Option<String>) {
        if !decision.can_execute {
            return (Outcome::Skipped, None);
        }
        if let Err(e) = self.mailbox.flag(&message.id).await {
            warn!(id = %message.id, error = %e, "Could not flag message");
        }
        (Outcome::Flagged, None)
    }
}

struct ArchiveHandler {
    mailbox: Arc<dyn Mailbox>,
    dry_run: bool,
}

#[async_trait]
impl ActionHandler for ArchiveHandler {
    async fn execute(
        &self,
        message: &MailMessage,
        _classification: &Classification,
        _matched_rule: &MatchedRule,
        decision: &SafetyDecision,
    ) -> (Outcome, Option<String>) {
        if !decision.can_execute {
            return (Outcome::Skipped, None);
        }
        if self.dry_run {
            // Simulated.
            return (Outcome::Archived, None);
        }
        match self.mailbox.archive(&message.id).await {
            Ok(()) => (Outcome::Archived, None),
            Err(e) => {
                warn!(id = %message.id, error = %e, "Archive failed");
                (Outcome::Error, None)
            }
        }
    }
}

/// Shared handler for `Reply`, `DraftReply`, and `FlagAndDraft`: generate
/// a reply, then either auto-send it or save it as a draft.
struct ReplyHandler {
    mailbox: Arc<dyn Mailbox>,
    generator: Arc<dyn ReplyGenerator>,
    safety: Arc<SafetyGate>,
    templates: HashMap<String, String>,
    dry_run: bool,
}

#[async_trait]
impl ActionHandler for ReplyHandler {
    async fn execute(
        &self,
        message: &MailMessage,
        classification: &Classification,
        matched_rule: &MatchedRule,
        decision: &SafetyDecision,
    ) -> (Outcome, Option<String>) {
        let template = matched_rule
            .template
            .as_ref()
            .and_then(|name| self.templates.get(name))
            .map(String::as_str);

        let Some(reply) = self
            .generator
            .generate(message, classification, template)
            .await
        else {
            warn!(id = %message.id, "Failed to generate reply");
            return (Outcome::Error, None);
        };

        let to_address = extract_email_address(&message.from_address);
        let reply_subject = make_reply_subject(&message.subject);

        if decision.can_auto_send && !self.dry_run {
            match self
                .mailbox
                .send_reply(
                    &to_address,
                    &reply_subject,
                    &reply,
                    message.message_id.as_deref(),
                    &message.references,
                )
                .await
            {
                Ok(()) => {
                    self.safety.record_send();
                    info!(id = %message.id, to = %to_address, "Reply sent");
                    (Outcome::ReplySent, Some(reply))
                }
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Reply send failed");
                    (Outcome::Error, Some(reply))
                }
            }
        } else {
            if !self.dry_run {
                match self
                    .mailbox
                    .save_draft(
                        &to_address,
                        &reply_subject,
                        &reply,
                        message.message_id.as_deref(),
                        &message.references,
                    )
                    .await
                {
                    Ok(()) => info!(id = %message.id, "Draft saved"),
                    Err(e) => warn!(id = %message.id, error = %e, "Could not save draft"),
                }
                if matched_rule.action == ActionKind::FlagAndDraft
                    && decision.can_execute
                    && let Err(e) = self.mailbox.flag(&message.id).await
                {
                    warn!(id = %message.id, error = %e, "Could not flag message");
                }
            }

            let outcome = if matched_rule.action == ActionKind::FlagAndDraft {
                Outcome::FlaggedAndDrafted
            } else {
                Outcome::DraftSaved
            };
            (outcome, Some(reply))
        }
    }
}

/// Capability-keyed handler lookup.
pub struct ActionDispatcher {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionDispatcher {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        generator: Arc<dyn ReplyGenerator>,
        safety: Arc<SafetyGate>,
        templates: HashMap<String, String>,
        dry_run: bool,
    ) -> Self {
        let reply: Arc<dyn ActionHandler> = Arc::new(ReplyHandler {
            mailbox: Arc::clone(&mailbox),
            generator,
            safety,
            templates,
            dry_run,
        });

        let mut handlers: HashMap<ActionKind, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(ActionKind::Reply, Arc::clone(&reply));
        handlers.insert(ActionKind::DraftReply, Arc::clone(&reply));
        handlers.insert(ActionKind::FlagAndDraft, reply);
        handlers.insert(
            ActionKind::Archive,
            Arc::new(ArchiveHandler {
                mailbox: Arc::clone(&mailbox),
                dry_run,
            }),
        );
        handlers.insert(ActionKind::Flag, Arc::new(FlagHandler { mailbox }));
        handlers.insert(ActionKind::Ignore, Arc::new(IgnoreHandler));

        Self { handlers }
    }

    pub async fn dispatch(
        &self,
        message: &MailMessage,
        classification: &Classification,
        matched_rule: &MatchedRule,
        decision: &SafetyDecision,
    ) -> (Outcome, Option<String>) {
        match self.handlers.get(&matched_rule.action) {
            Some(handler) => {
                handler
                    .execute(message, classification, matched_rule, decision)
                    .await
            }
            None => (Outcome::Skipped, None),
        }
    }
}
