//! Message classification and reply generation.
//!
//! The `Classifier` and `ReplyGenerator` traits are the pipeline's only
//! view of the LLM; the `Llm*` implementations live here, tests use mocks.

pub mod classifier;
pub mod reply;
pub mod types;

pub use classifier::{Classifier, LlmClassifier};
pub use reply::{LlmReplyGenerator, ReplyGenerator};
pub use types::{ActionSuggestion, Classification, EntityBag, Intent, Priority};
