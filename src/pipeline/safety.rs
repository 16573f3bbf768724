//! Safety gate — decides whether an action may run and whether a reply
//! may be sent without review.
//!
//! Three checks: dry-run mode, confidence threshold, and an hourly
//! sliding-window send limit. Blocks everything unless explicitly allowed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::types::Classification;
use crate::config::SafetyConfig;
use crate::pipeline::rules::MatchedRule;

/// Sliding-window length for the send rate limit.
const RATE_WINDOW: Duration = Duration::from_secs(3600);

/// Fraction of the cap at which a warning is raised.
const WARN_FRACTION: f64 = 0.8;

/// Outcome of the safety checks for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDecision {
    /// Whether the matched action may run at all.
    pub can_execute: bool,
    /// Whether a reply may go out without human review.
    pub can_auto_send: bool,
    /// Ordered check tokens, e.g. `dry_run_active`, `confidence_ok`.
    pub reasons: Vec<String>,
    /// Non-blocking warnings, e.g. approaching the rate limit.
    pub warnings: Vec<String>,
}

/// Time source for the rate-limit window. Injectable so tests can advance
/// time without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by the monotonic system clock.
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Snapshot of the gate's current state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub dry_run: bool,
    pub confidence_threshold: f32,
    pub max_sends_per_hour: usize,
    pub sends_this_hour: usize,
    pub sends_remaining: usize,
}

/// Evaluates whether an action is safe to execute.
pub struct SafetyGate {
    config: SafetyConfig,
    clock: Box<dyn Clock>,
    send_times: Mutex<VecDeque<Instant>>,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self::with_clock(config, Box::new(MonotonicClock))
    }

    pub fn with_clock(config: SafetyConfig, clock: Box<dyn Clock>) -> Self {
        debug!(
            dry_run = config.dry_run,
            threshold = config.confidence_threshold,
            max_sends_per_hour = config.max_sends_per_hour,
            "Safety gate initialized"
        );
        Self {
            config,
            clock,
            send_times: Mutex::new(VecDeque::new()),
        }
    }

    /// Run all checks and return a decision. Never fails.
    pub fn evaluate(
        &self,
        classification: &Classification,
        matched_rule: Option<&MatchedRule>,
    ) -> SafetyDecision {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let dry_run = self.config.dry_run;
        if dry_run {
            reasons.push("dry_run_active".to_string());
        }

        let confidence_ok = classification.confidence >= self.config.confidence_threshold;
        reasons.push(
            if confidence_ok {
                "confidence_ok"
            } else {
                "confidence_too_low"
            }
            .to_string(),
        );

        let sends_this_hour = self.sends_this_hour();
        let rate_limit_ok = sends_this_hour < self.config.max_sends_per_hour;
        reasons.push(
            if rate_limit_ok {
                "rate_limit_ok"
            } else {
                "rate_limit_exceeded"
            }
            .to_string(),
        );

        if sends_this_hour as f64 >= self.config.max_sends_per_hour as f64 * WARN_FRACTION {
            warnings.push(format!(
                "approaching_rate_limit ({sends_this_hour}/{})",
                self.config.max_sends_per_hour
            ));
        }

        // Safe-set actions never send anything, so the rate limit does not
        // apply to them.
        let is_safe_action = matched_rule.map(|r| r.action.is_safe()).unwrap_or(false);

        let can_execute = if dry_run {
            false
        } else if is_safe_action {
            confidence_ok
        } else {
            confidence_ok && rate_limit_ok
        };

        let auto_send_requested = matched_rule.map(|r| r.auto_send).unwrap_or(false);
        let can_auto_send =
            can_execute && auto_send_requested && !dry_run && confidence_ok && rate_limit_ok;

        let decision = SafetyDecision {
            can_execute,
            can_auto_send,
            reasons,
            warnings,
        };

        info!(
            rule = matched_rule.map(|r| r.rule_name.as_str()).unwrap_or("none"),
            action = matched_rule.map(|r| r.action.label()).unwrap_or("none"),
            confidence = classification.confidence,
            can_execute = decision.can_execute,
            can_auto_send = decision.can_auto_send,
            reasons = ?decision.reasons,
            "Safety decision"
        );
        for warning in &decision.warnings {
            warn!(%warning, "Safety warning");
        }

        decision
    }

    /// Record a confirmed successful send. The only external mutation.
    pub fn record_send(&self) {
        let mut times = self.send_times.lock().unwrap();
        times.push_back(self.clock.now());
        debug!(
            sends_this_hour = times.len(),
            max = self.config.max_sends_per_hour,
            "Send recorded"
        );
    }

    pub fn status(&self) -> SafetyStatus {
        let sends_this_hour = self.sends_this_hour();
        SafetyStatus {
            dry_run: self.config.dry_run,
            confidence_threshold: self.config.confidence_threshold,
            max_sends_per_hour: self.config.max_sends_per_hour,
            sends_this_hour,
            sends_remaining: self.config.max_sends_per_hour.saturating_sub(sends_this_hour),
        }
    }

    /// Evict entries older than the window and count what remains.
    fn sends_this_hour(&self) -> usize {
        let now = self.clock.now();
        let mut times = self.send_times.lock().unwrap();
        while let Some(front) = times.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                times.pop_front();
            } else {
                break;
            }
        }
        times.len()
    }
}
