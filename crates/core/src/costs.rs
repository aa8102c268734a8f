use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::filter_by_time;
use crate::pricing::Pricing;
use crate::types::SessionStats;

/// Aggregate costs split by token class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTypeCosts {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_5m_cost: f64,
    pub cache_1h_cost: f64,
    pub cache_read_cost: f64,
    pub cache_cost: f64,
    pub total_cost: f64,
}

/// Cost components for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCostRow {
    pub model: String,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_5m_cost: f64,
    pub cache_1h_cost: f64,
    pub cache_read_cost: f64,
    pub cache_cost: f64,
    pub total_cost: f64,
}

/// Computes token-class and per-model cost splits. Pricing is resolved at
/// each session's start time; models missing from the price table are
/// skipped entirely.
pub fn aggregate_cost_breakdown(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    pricing: &Pricing,
) -> (TokenTypeCosts, Vec<ModelCostRow>) {
    let filtered = filter_by_time(sessions, since, until);

    let mut totals = TokenTypeCosts::default();
    let mut by_model: HashMap<&str, ModelCostRow> = HashMap::new();

    for s in &filtered {
        for (model, usage) in &s.models {
            let Some(entry) = pricing.lookup_at(model, s.start_time) else {
                continue;
            };

            let input_cost = usage.input_tokens as f64 * entry.input_per_mtok / 1_000_000.0;
            let output_cost = usage.output_tokens as f64 * entry.output_per_mtok / 1_000_000.0;
            let cache_5m_cost =
                usage.cache_creation_5m_tokens as f64 * entry.cache_write_5m_per_mtok / 1_000_000.0;
            let cache_1h_cost =
                usage.cache_creation_1h_tokens as f64 * entry.cache_write_1h_per_mtok / 1_000_000.0;
            let cache_read_cost =
                usage.cache_read_tokens as f64 * entry.cache_read_per_mtok / 1_000_000.0;

            totals.input_cost += input_cost;
            totals.output_cost += output_cost;
            totals.cache_5m_cost += cache_5m_cost;
            totals.cache_1h_cost += cache_1h_cost;
            totals.cache_read_cost += cache_read_cost;

            let row = by_model
                .entry(model.as_str())
                .or_insert_with(|| ModelCostRow {
                    model: model.clone(),
                    ..ModelCostRow::default()
                });
            row.input_cost += input_cost;
            row.output_cost += output_cost;
            row.cache_5m_cost += cache_5m_cost;
            row.cache_1h_cost += cache_1h_cost;
            row.cache_read_cost += cache_read_cost;
        }
    }

    totals.cache_cost = totals.cache_5m_cost + totals.cache_1h_cost + totals.cache_read_cost;
    totals.total_cost = totals.input_cost + totals.output_cost + totals.cache_cost;

    let mut rows: Vec<ModelCostRow> = by_model
        .into_values()
        .map(|mut row| {
            row.cache_cost = row.cache_5m_cost + row.cache_1h_cost + row.cache_read_cost;
            row.total_cost = row.input_cost + row.output_cost + row.cache_cost;
            row
        })
        .collect();
    rows.sort_by(|a, b| b.total_cost.total_cmp(&a.total_cost));

    (totals, rows)
}
