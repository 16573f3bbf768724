//! LLM-backed message classification.
//!
//! Classification is infallible at the trait seam: any provider or parse
//! failure degrades to the zero-confidence fallback, which the safety gate
//! then blocks from every non-safe action.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::classify::types::{ActionSuggestion, Classification, EntityBag, Intent, Priority};
use crate::cost::CostTracker;
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::MailMessage;

/// Body truncation for the main classification prompt.
const BODY_LIMIT: usize = 2000;

/// Body truncation for the simplified retry prompt.
const RETRY_BODY_LIMIT: usize = 500;

/// Classifies messages and optionally suggests actions.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a message. Never fails; internal errors produce the
    /// zero-confidence fallback.
    async fn classify(&self, message: &MailMessage) -> Classification;

    /// Ask for a structured action suggestion. Failures yield `None`.
    async fn suggest_action(
        &self,
        message: &MailMessage,
        classification: &Classification,
    ) -> Option<ActionSuggestion>;
}

/// Raw JSON shape returned by the model; every field optional so a partial
/// answer still parses.
#[derive(Deserialize)]
struct RawClassification {
    intent: Option<String>,
    priority: Option<String>,
    confidence: Option<f32>,
    entities: Option<EntityBag>,
    suggested_action: Option<String>,
    reasoning: Option<String>,
}

pub struct LlmClassifier {
    provider: Arc<dyn LlmProvider>,
    costs: Arc<CostTracker>,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, costs: Arc<CostTracker>) -> Self {
        Self { provider, costs }
    }

    async fn complete_and_track(
        &self,
        operation: &str,
        prompt: String,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are an expert email classification assistant."),
            ChatMessage::user(prompt),
        ]);
        let response = self.provider.complete(request).await?;
        self.costs.record(
            operation,
            &response.model,
            response.input_tokens,
            response.output_tokens,
        );
        Ok(response.content)
    }

    fn build_prompt(&self, message: &MailMessage) -> String {
        let mut prompt = format!(
            "Analyze this email and classify it accurately.\n\
             \n\
             EMAIL TO CLASSIFY:\n\
             \x20 From: {}\n\
             \x20 To: {}\n\
             \x20 Subject: {}\n\
             \x20 Date: {}\n\
             \x20 Body:\n{}\n",
            message.from_address,
            message.to_address,
            message.subject,
            message.date.to_rfc2822(),
            truncate(&message.body, BODY_LIMIT),
        );

        if let Some(context) = build_thread_context(message) {
            prompt.push_str(&format!(
                "\nPREVIOUS MESSAGES IN THIS THREAD:\n{context}\n\
                 Use the thread context to understand whether this is a \
                 follow-up, escalation, or new topic.\n"
            ));
        }

        prompt.push_str(
            "\nCLASSIFICATION GUIDELINES:\n\
             - intent: one of meeting_request, newsletter, urgent_issue, spam, \
             general_inquiry, follow_up, complaint, action_required\n\
             - priority: \"high\" = within hours, \"medium\" = within a day, \
             \"low\" = informational\n\
             - confidence: 0.95+ obvious, 0.80-0.95 strong signals, \
             0.60-0.80 mixed, below 0.60 uncertain\n\
             - entities: any dates, people's names, and action items mentioned\n\
             - suggested_action: one of reply, draft_reply, archive, flag, \
             ignore, flag_and_draft\n\
             - reasoning: brief explanation\n\
             \n\
             Return ONLY valid JSON with this exact structure (no markdown, \
             no code blocks, no extra text):\n\
             {\"intent\": \"category\", \"priority\": \"level\", \
             \"confidence\": 0.00, \"entities\": {\"dates\": [], \"names\": [], \
             \"action_items\": []}, \"suggested_action\": \"action\", \
             \"reasoning\": \"explanation\"}",
        );

        prompt
    }

    fn build_retry_prompt(&self, message: &MailMessage) -> String {
        format!(
            "Classify this email. Return ONLY valid JSON.\n\
             \n\
             From: {}\n\
             Subject: {}\n\
             Body: {}\n\
             \n\
             JSON format:\n\
             {{\"intent\": \"meeting_request|newsletter|urgent_issue|spam|\
             general_inquiry|follow_up|complaint|action_required\", \
             \"priority\": \"high|medium|low\", \"confidence\": 0.0, \
             \"entities\": {{\"dates\": [], \"names\": [], \"action_items\": []}}, \
             \"suggested_action\": \"reply|draft_reply|archive|flag|ignore\", \
             \"reasoning\": \"brief explanation\"}}",
            message.from_address,
            message.subject,
            truncate(&message.body, RETRY_BODY_LIMIT),
        )
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, message: &MailMessage) -> Classification {
        let prompt = self.build_prompt(message);

        let classification = match self.complete_and_track("classify", prompt).await {
            Ok(content) => match parse_classification(&content) {
                Ok(classification) => classification,
                Err(parse_err) => {
                    // One retry with a stripped-down prompt before giving up.
                    warn!(error = %parse_err, "Classification parse failed, retrying simplified");
                    let retry_prompt = self.build_retry_prompt(message);
                    match self.complete_and_track("classify_retry", retry_prompt).await {
                        Ok(content) => parse_classification(&content)
                            .unwrap_or_else(|e| Classification::fallback(&e.to_string())),
                        Err(e) => Classification::fallback(&e.to_string()),
                    }
                }
            },
            Err(e) => Classification::fallback(&e.to_string()),
        };

        info!(
            id = %message.id,
            intent = classification.intent.label(),
            priority = classification.priority.label(),
            confidence = classification.confidence,
            action = %classification.suggested_action,
            "Classification complete"
        );
        classification
    }

    async fn suggest_action(
        &self,
        message: &MailMessage,
        classification: &Classification,
    ) -> Option<ActionSuggestion> {
        // Pointless to refine a classification we could not make.
        if classification.confidence <= 0.0 {
            return None;
        }

        let mut prompt = format!(
            "Suggest the best action for this email.\n\
             \n\
             EMAIL:\n\
             \x20 From: {}\n\
             \x20 Subject: {}\n\
             \x20 Body: {}\n",
            message.from_address,
            message.subject,
            truncate(&message.body, 1500),
        );
        if let Some(context) = build_thread_context(message) {
            prompt.push_str(&format!("\nTHREAD CONTEXT (previous messages):\n{context}\n"));
        }
        prompt.push_str(
            "\nReturn ONLY valid JSON: {\"action_type\": \
             \"reply|draft_reply|archive|flag|ignore|flag_and_draft\", \
             \"confidence\": 0.0, \"reasoning\": \"...\", \
             \"reply_template_hint\": \"...\"}",
        );

        let content = match self.complete_and_track("suggest_action", prompt).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Action suggestion failed, continuing without");
                return None;
            }
        };

        let value: serde_json::Value = serde_json::from_str(extract_json(&content)).ok()?;
        let suggestion = ActionSuggestion::safe_from_value(&value)?;
        info!(
            action = %suggestion.action_type,
            confidence = suggestion.confidence,
            "Action suggested"
        );
        Some(suggestion)
    }
}

/// Format resolved thread context for the prompt, most recent last.
fn build_thread_context(message: &MailMessage) -> Option<String> {
    if message.thread_context.is_empty() {
        return None;
    }

    let total = message.thread_context.len();
    let mut parts = Vec::with_capacity(total);
    for (i, msg) in message.thread_context.iter().enumerate() {
        // Recent messages get more body text.
        let body_limit = if i + 2 >= total { 500 } else { 200 };
        let marker = if i + 1 == total { " [LATEST]" } else { "" };
        parts.push(format!(
            "  [{}/{total}]{marker}\n    From: {}\n    Date: {}\n    Subject: {}\n    Body: {}\n",
            i + 1,
            msg.sender,
            msg.date,
            msg.subject,
            truncate(&msg.body, body_limit),
        ));
    }

    debug!(messages = total, "Thread context built for prompt");
    Some(parts.join("\n"))
}

/// Parse model output into a classification, tolerating markdown fences
/// and unknown enum values.
fn parse_classification(raw: &str) -> Result<Classification, serde_json::Error> {
    let raw: RawClassification = serde_json::from_str(extract_json(raw))?;

    let mut classification = Classification::new(
        raw.intent
            .as_deref()
            .map(Intent::parse_lenient)
            .unwrap_or(Intent::GeneralInquiry),
        raw.priority
            .as_deref()
            .map(Priority::parse_lenient)
            .unwrap_or(Priority::Medium),
        raw.confidence.unwrap_or(0.5),
    );
    classification.entities = raw.entities.unwrap_or_default();
    classification.suggested_action = raw.suggested_action.unwrap_or_else(|| "none".to_string());
    classification.reasoning = raw
        .reasoning
        .unwrap_or_else(|| "No reasoning provided".to_string());
    Ok(classification)
}

/// Strip markdown code fences and surrounding prose around a JSON object.
fn extract_json(raw: &str) -> &str {
    let mut cleaned = raw.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    let cleaned = cleaned.trim();

    // Fall back to the outermost braces when prose surrounds the object.
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
