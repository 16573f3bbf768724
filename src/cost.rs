//! LLM API cost tracking.
//!
//! Records token usage per call and aggregates per-operation dollar
//! totals for the end-of-run summary. Exact decimal arithmetic so
//! fractions of a cent never drift.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

const TOKENS_PER_PRICE_UNIT: Decimal = dec!(1_000_000);

/// Default pricing, dollars per 1M tokens.
pub const DEFAULT_INPUT_COST_PER_1M: Decimal = dec!(0.15);
pub const DEFAULT_OUTPUT_COST_PER_1M: Decimal = dec!(0.60);

/// Cost data for a single LLM call.
#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub timestamp: DateTime<Utc>,
    /// What the call was for: "classify", "reply_generation", etc.
    pub operation: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
}

/// Aggregated cost statistics for the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
    pub cost_by_operation: HashMap<String, Decimal>,
    pub avg_cost_per_call: Decimal,
}

#[derive(Default)]
struct TrackerState {
    calls: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_cost: Decimal,
    by_operation: HashMap<String, Decimal>,
}

/// Accumulates per-call costs for the current run.
pub struct CostTracker {
    input_cost_per_1m: Decimal,
    output_cost_per_1m: Decimal,
    state: Mutex<TrackerState>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::with_pricing(DEFAULT_INPUT_COST_PER_1M, DEFAULT_OUTPUT_COST_PER_1M)
    }

    pub fn with_pricing(input_cost_per_1m: Decimal, output_cost_per_1m: Decimal) -> Self {
        Self {
            input_cost_per_1m,
            output_cost_per_1m,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Record a single LLM call.
    pub fn record(
        &self,
        operation: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> CostRecord {
        let input_cost =
            Decimal::from(input_tokens) / TOKENS_PER_PRICE_UNIT * self.input_cost_per_1m;
        let output_cost =
            Decimal::from(output_tokens) / TOKENS_PER_PRICE_UNIT * self.output_cost_per_1m;
        let total_cost = input_cost + output_cost;

        let record = CostRecord {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            input_cost,
            output_cost,
            total_cost,
        };

        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.input_tokens += u64::from(input_tokens);
        state.output_tokens += u64::from(output_tokens);
        state.total_cost += total_cost;
        *state
            .by_operation
            .entry(operation.to_string())
            .or_default() += total_cost;

        info!(
            operation,
            input_tokens,
            output_tokens,
            cost = %total_cost,
            run_total = %state.total_cost,
            "Cost recorded"
        );

        record
    }

    pub fn summary(&self) -> CostSummary {
        let state = self.state.lock().unwrap();
        let avg_cost_per_call = if state.calls > 0 {
            state.total_cost / Decimal::from(state.calls)
        } else {
            Decimal::ZERO
        };
        CostSummary {
            total_calls: state.calls,
            total_input_tokens: state.input_tokens,
            total_output_tokens: state.output_tokens,
            total_tokens: state.input_tokens + state.output_tokens,
            total_cost: state.total_cost,
            cost_by_operation: state.by_operation.clone(),
            avg_cost_per_call,
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_computes_exact_costs() {
        let tracker = CostTracker::with_pricing(dec!(0.15), dec!(0.60));
        let record = tracker.record("classify", "gpt-4o-mini", 1_000_000, 500_000);

        assert_eq!(record.input_cost, dec!(0.15));
        assert_eq!(record.output_cost, dec!(0.30));
        assert_eq!(record.total_cost, dec!(0.45));
        assert_eq!(record.total_tokens, 1_500_000);
    }

    #[test]
    fn summary_aggregates_per_operation() {
        let tracker = CostTracker::with_pricing(dec!(0.15), dec!(0.60));
        tracker.record("classify", "gpt-4o-mini", 1_000_000, 0);
        tracker.record("classify", "gpt-4o-mini", 1_000_000, 0);
        tracker.record("reply_generation", "gpt-4o-mini", 0, 1_000_000);

        let summary = tracker.summary();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.total_tokens, 3_000_000);
        assert_eq!(summary.cost_by_operation["classify"], dec!(0.30));
        assert_eq!(summary.cost_by_operation["reply_generation"], dec!(0.60));
        assert_eq!(summary.total_cost, dec!(0.90));
        assert_eq!(summary.avg_cost_per_call, dec!(0.30));
    }

    #[test]
    fn empty_tracker_summary_is_zero() {
        let tracker = CostTracker::new();
        let summary = tracker.summary();
        assert_eq!(summary.total_calls, 0);
        assert_eq!(summary.total_cost, Decimal::ZERO);
        assert_eq!(summary.avg_cost_per_call, Decimal::ZERO);
    }
}
