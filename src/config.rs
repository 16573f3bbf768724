//! Configuration loading and validation.
//!
//! Behavior (rules, safety, processing) comes from a JSON config file;
//! secrets (mailbox credentials, API key) come from environment variables.
//! Everything is validated up front — a bad rule fails the run at load
//! time, never mid-batch.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::types::{Intent, Priority};
use crate::error::ConfigError;
use crate::pipeline::types::ActionKind;

// ── Safety ──────────────────────────────────────────────────────────

/// Safety gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Simulation mode: decisions are computed and displayed, nothing executes.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Minimum classification confidence for any gated action (inclusive).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Hard cap on sends within the trailing 60-minute window.
    #[serde(default = "default_max_sends_per_hour")]
    pub max_sends_per_hour: usize,
}

fn default_dry_run() -> bool {
    true
}
fn default_confidence_threshold() -> f32 {
    0.85
}
fn default_max_sends_per_hour() -> usize {
    20
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            confidence_threshold: 0.85,
            max_sends_per_hour: 20,
        }
    }
}

// ── Processing ──────────────────────────────────────────────────────

/// Per-run processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: usize,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// How many prior thread messages to resolve (clamped to 0..=10).
    #[serde(default = "default_thread_depth")]
    pub thread_context_depth: usize,
}

fn default_max_messages() -> usize {
    10
}
fn default_mailbox() -> String {
    "INBOX".into()
}
fn default_thread_depth() -> usize {
    5
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_messages_per_run: 10,
            mailbox: "INBOX".into(),
            thread_context_depth: 5,
        }
    }
}

impl ProcessingConfig {
    /// Thread depth clamped to the supported range.
    pub fn effective_thread_depth(&self) -> usize {
        self.thread_context_depth.min(10)
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// Reasoning-service settings. The API key comes from `LLM_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

// ── Rules ───────────────────────────────────────────────────────────

/// Conjunctive condition set for a single rule. All present conditions
/// must hold for the rule to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_contains: Option<String>,
}

impl RuleConditions {
    pub fn is_empty(&self) -> bool {
        self.intent.is_none()
            && self.priority.is_none()
            && self.confidence_min.is_none()
            && self.sender_contains.is_none()
            && self.subject_contains.is_none()
    }
}

/// A single ordered automation rule. Loaded once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub conditions: RuleConditions,
    pub action: ActionKind,
    #[serde(default)]
    pub auto_send: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

// ── Mailbox (env-only) ──────────────────────────────────────────────

/// Mailbox connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub archive_folder: String,
    pub drafts_folder: String,
}

impl MailboxConfig {
    /// Build from environment. `MAIL_IMAP_HOST` and `MAIL_USERNAME` are
    /// required; everything else has sensible defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("MAIL_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("MAIL_IMAP_HOST".into()))?;
        let username = std::env::var("MAIL_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("MAIL_USERNAME".into()))?;
        let password = std::env::var("MAIL_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("MAIL_PASSWORD".into()))?;

        let imap_port: u16 = std::env::var("MAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);
        let smtp_host = std::env::var("MAIL_SMTP_HOST")
            .unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let smtp_port: u16 = std::env::var("MAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(465);
        let from_address =
            std::env::var("MAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let archive_folder =
            std::env::var("MAIL_ARCHIVE_FOLDER").unwrap_or_else(|_| "Archive".into());
        let drafts_folder =
            std::env::var("MAIL_DRAFTS_FOLDER").unwrap_or_else(|_| "Drafts".into());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            archive_folder,
            drafts_folder,
        })
    }
}

// ── Logging ─────────────────────────────────────────────────────────

/// Logging / audit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_log_dir() -> String {
    "logs".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".into(),
        }
    }
}

// ── App config ──────────────────────────────────────────────────────

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl AppConfig {
    /// Load from a JSON config file, apply env overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `DRY_RUN` in the environment overrides the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(dry_run) = std::env::var("DRY_RUN") {
            self.safety.dry_run = !matches!(dry_run.to_lowercase().as_str(), "false" | "0" | "no");
        }
    }

    /// Fail fast on anything an operator got wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.safety.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "safety.confidence_threshold".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }
        if self.safety.max_sends_per_hour < 1 {
            return Err(ConfigError::InvalidValue {
                key: "safety.max_sends_per_hour".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.rules.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "rules".into(),
                message: "no rules defined".into(),
            });
        }
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    rule: "(unnamed)".into(),
                    message: "missing a name".into(),
                });
            }
            if rule.conditions.is_empty() {
                return Err(ConfigError::InvalidRule {
                    rule: rule.name.clone(),
                    message: "has no conditions".into(),
                });
            }
            if let Some(min) = rule.conditions.confidence_min
                && !(0.0..=1.0).contains(&min)
            {
                return Err(ConfigError::InvalidRule {
                    rule: rule.name.clone(),
                    message: "confidence_min must be between 0.0 and 1.0".into(),
                });
            }
            if rule.auto_send && rule.action == ActionKind::Ignore {
                return Err(ConfigError::InvalidRule {
                    rule: rule.name.clone(),
                    message: "auto_send makes no sense for the ignore action".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config_json() -> &'static str {
        r#"{
            "safety": {"dry_run": true, "confidence_threshold": 0.85, "max_sends_per_hour": 20},
            "rules": [
                {"name": "Spam", "conditions": {"intent": "spam"}, "action": "ignore"},
                {"name": "Urgent", "conditions": {"priority": "high", "confidence_min": 0.9},
                 "action": "flag_and_draft", "template": "urgent"}
            ],
            "templates": {"urgent": "I received your message and will respond shortly."}
        }"#
    }

    #[test]
    fn parses_valid_config() {
        let config: AppConfig = serde_json::from_str(valid_config_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].action, ActionKind::Ignore);
        assert_eq!(config.rules[1].conditions.confidence_min, Some(0.9));
        assert!(config.templates.contains_key("urgent"));
    }

    #[test]
    fn defaults_applied_when_sections_missing() {
        let config: AppConfig =
            serde_json::from_str(r#"{"rules": [{"name": "X", "conditions": {"intent": "spam"}, "action": "ignore"}]}"#)
                .unwrap();
        assert!(config.safety.dry_run);
        assert_eq!(config.safety.max_sends_per_hour, 20);
        assert_eq!(config.processing.mailbox, "INBOX");
        assert_eq!(config.processing.thread_context_depth, 5);
    }

    #[test]
    fn rejects_empty_rules() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_rule_without_conditions() {
        let config: AppConfig = serde_json::from_str(
            r#"{"rules": [{"name": "Bad", "conditions": {}, "action": "flag"}]}"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no conditions"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config: AppConfig = serde_json::from_str(
            r#"{"safety": {"confidence_threshold": 1.5},
                "rules": [{"name": "X", "conditions": {"intent": "spam"}, "action": "ignore"}]}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        let result: std::result::Result<AppConfig, _> = serde_json::from_str(
            r#"{"rules": [{"name": "X", "conditions": {"intent": "spam"}, "action": "explode"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn thread_depth_clamped() {
        let config = ProcessingConfig {
            thread_context_depth: 50,
            ..Default::default()
        };
        assert_eq!(config.effective_thread_depth(), 10);
    }
}
