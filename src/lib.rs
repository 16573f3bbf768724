//! Mail Triage — rule-driven email classification and response pipeline.

pub mod audit;
pub mod classify;
pub mod config;
pub mod cost;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod transport;
