//! The triage decision pipeline.
//!
//! Every fetched message flows through:
//! 1. `ThreadResolver::resolve()` — rebuild conversation context
//! 2. `Classifier::classify()` — one LLM classification per message
//! 3. `RuleEngine::matches()` — first matching rule picks the action
//! 4. `SafetyGate::evaluate()` — confidence, rate limit, dry-run
//! 5. `ActionDispatcher::dispatch()` — execute, simulate, or skip
//!
//! Nothing is ever sent unless a rule opted in to auto-send AND the
//! safety gate allowed it.

pub mod actions;
pub mod processor;
pub mod rules;
pub mod safety;
pub mod thread;
pub mod types;

pub use actions::ActionDispatcher;
pub use processor::MessageProcessor;
pub use rules::{MatchedRule, RuleEngine};
pub use safety::{SafetyDecision, SafetyGate};
pub use thread::ThreadResolver;
pub use types::{ActionKind, MailMessage, Outcome, ProcessingRecord, ThreadMessage};
