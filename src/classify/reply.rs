//! LLM-backed reply generation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::classify::types::{Classification, Intent};
use crate::cost::CostTracker;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::MailMessage;

/// Generates reply text for a message. `None` means generation failed.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        message: &MailMessage,
        classification: &Classification,
        template: Option<&str>,
    ) -> Option<String>;
}

pub struct LlmReplyGenerator {
    provider: Arc<dyn LlmProvider>,
    costs: Arc<CostTracker>,
}

impl LlmReplyGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, costs: Arc<CostTracker>) -> Self {
        Self { provider, costs }
    }

    async fn complete_and_track(&self, operation: &str, prompt: String) -> Option<String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are a professional email assistant."),
            ChatMessage::user(prompt),
        ]);
        match self.provider.complete(request).await {
            Ok(response) => {
                self.costs.record(
                    operation,
                    &response.model,
                    response.input_tokens,
                    response.output_tokens,
                );
                Some(response.content)
            }
            Err(e) => {
                error!(error = %e, "Reply generation failed");
                None
            }
        }
    }

    fn build_prompt(&self, message: &MailMessage, classification: &Classification) -> String {
        let mut prompt = format!(
            "Generate a reply to the following email.\n\
             \n\
             ORIGINAL EMAIL:\n\
             \x20 From: {}\n\
             \x20 Subject: {}\n\
             \x20 Body:\n{}\n",
            message.from_address,
            message.subject,
            truncate(&message.body, 2000),
        );

        if !message.thread_context.is_empty() {
            prompt.push_str("\nCONVERSATION HISTORY (previous messages in this thread):\n");
            for msg in &message.thread_context {
                prompt.push_str(&format!(
                    "  From: {}\n  Body: {}\n\n",
                    msg.sender,
                    truncate(&msg.body, 200),
                ));
            }
            prompt.push_str(
                "Use the history to reference earlier points, keep a consistent \
                 tone, and avoid repeating information already shared.\n",
            );
        }

        if let Some(ref suggestion) = classification.suggestion
            && !suggestion.reply_template_hint.is_empty()
        {
            prompt.push_str(&format!(
                "\nTONE/CONTENT HINT: {}\n",
                suggestion.reply_template_hint
            ));
        }

        prompt.push_str(&format!(
            "\nCONTEXT:\n\
             \x20 This email was classified as: {}\n\
             \x20 Priority: {}\n\
             \n\
             TONE AND STYLE GUIDANCE:\n{}\n\
             \n\
             RULES:\n\
             \x20 - Be professional but warm and human-sounding\n\
             \x20 - Be concise (3-6 sentences unless more detail is needed)\n\
             \x20 - Reference specific details from the original email\n\
             \x20 - Do NOT make up facts, commitments, or specific times\n\
             \x20 - Do NOT include a subject line, just the reply body\n\
             \x20 - End with a simple sign-off like \"Best regards\" or \"Thanks\"\n\
             \x20 - Do NOT use placeholder text like [Your Name]\n\
             \n\
             Generate the reply now:",
            classification.intent.label(),
            classification.priority.label(),
            tone_guidance(classification.intent),
        ));

        prompt
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(
        &self,
        message: &MailMessage,
        classification: &Classification,
        template: Option<&str>,
    ) -> Option<String> {
        let (operation, prompt) = match template {
            Some(template) => ("reply_template", template.to_string()),
            None => ("reply_generation", self.build_prompt(message, classification)),
        };

        let raw = self.complete_and_track(operation, prompt).await?;
        let reply = clean_reply(&raw);
        info!(
            id = %message.id,
            chars = reply.len(),
            intent = classification.intent.label(),
            from_template = template.is_some(),
            "Reply generated"
        );
        Some(reply)
    }
}

fn tone_guidance(intent: Intent) -> &'static str {
    match intent {
        Intent::MeetingRequest => {
            "  - Respond positively to the meeting request\n\
             \x20 - Acknowledge the proposed time if one was given\n\
             \x20 - Keep it brief and friendly"
        }
        Intent::UrgentIssue => {
            "  - Acknowledge the urgency immediately\n\
             \x20 - Indicate that you are looking into it\n\
             \x20 - Provide a timeline for follow-up if possible"
        }
        Intent::Complaint => {
            "  - Be empathetic and understanding\n\
             \x20 - Acknowledge the issue without being defensive\n\
             \x20 - Express commitment to resolving the problem"
        }
        Intent::FollowUp => {
            "  - Acknowledge the follow-up\n\
             \x20 - Reference the previous conversation context\n\
             \x20 - Provide an update or next steps"
        }
        Intent::ActionRequired => {
            "  - Confirm you've received the request\n\
             \x20 - Indicate when you'll complete the action or follow up\n\
             \x20 - Ask clarifying questions if the request is unclear"
        }
        _ => "  - Be professional and helpful\n  - Keep it concise",
    }
}

/// Strip artifacts models commonly add around reply bodies.
fn clean_reply(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let mut text = text.trim().to_string();

    // Drop a leading "Subject:" line if the model added one.
    if text.to_lowercase().starts_with("subject:") {
        text = match text.split_once('\n') {
            Some((_, rest)) => rest.trim().to_string(),
            None => String::new(),
        };
    }

    // Unwrap surrounding quotes.
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = text[1..text.len() - 1].to_string();
    }

    text
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_reply_strips_subject_line() {
        let raw = "Subject: Re: Meeting\nHappy to meet Thursday.\n\nBest regards";
        assert_eq!(clean_reply(raw), "Happy to meet Thursday.\n\nBest regards");
    }

    #[test]
    fn clean_reply_strips_fences_and_quotes() {
        assert_eq!(clean_reply("```text\nSounds good!\n```"), "Sounds good!");
        assert_eq!(clean_reply("\"Sounds good!\""), "Sounds good!");
    }

    #[test]
    fn clean_reply_passes_normal_text_through() {
        let raw = "Thanks for the update. I'll review it today.\n\nBest regards";
        assert_eq!(clean_reply(raw), raw);
    }

    #[test]
    fn tone_guidance_covers_urgent_and_default() {
        assert!(tone_guidance(Intent::UrgentIssue).contains("urgency"));
        assert!(tone_guidance(Intent::Spam).contains("concise"));
    }
}
