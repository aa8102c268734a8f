use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-million-token prices for one model.
///
/// The long-context rates are carried for forward compatibility but never
/// applied per call: long-context detection would need the total input
/// context size, which individual usage records do not expose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_write_5m_per_mtok: f64,
    pub cache_write_1h_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub long_input_per_mtok: f64,
    pub long_output_per_mtok: f64,
}

/// User-supplied per-field price overrides, layered on defaults at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingOverride {
    pub input_per_mtok: Option<f64>,
    pub output_per_mtok: Option<f64>,
    pub cache_write_5m_per_mtok: Option<f64>,
    pub cache_write_1h_per_mtok: Option<f64>,
    pub cache_read_per_mtok: Option<f64>,
}

#[derive(Debug, Clone)]
struct PricingVersion {
    /// None means "since forever" and sorts before any concrete date.
    effective_from: Option<DateTime<Utc>>,
    entry: PricingEntry,
}

/// Effective-dated price schedules keyed by canonical model name.
#[derive(Debug, Clone)]
pub struct Pricing {
    models: HashMap<String, Vec<PricingVersion>>,
}

impl Default for Pricing {
    fn default() -> Self {
        let mut models = HashMap::new();
        for (name, entry) in default_table() {
            models.insert(
                name.to_string(),
                vec![PricingVersion {
                    effective_from: None,
                    entry,
                }],
            );
        }
        Self { models }
    }
}

impl Pricing {
    /// Layers per-field overrides on top of the latest entry of each model.
    /// Unknown models get a fresh schedule seeded from the override alone.
    pub fn with_overrides(mut self, overrides: &HashMap<String, PricingOverride>) -> Self {
        for (model, ov) in overrides {
            let versions = self.models.entry(model.clone()).or_insert_with(|| {
                vec![PricingVersion {
                    effective_from: None,
                    entry: PricingEntry::default(),
                }]
            });
            if let Some(last) = versions.last_mut() {
                apply_override(&mut last.entry, ov);
            }
        }
        self
    }

    /// Adds an effective-dated entry for a model, keeping the schedule sorted.
    pub fn add_version(&mut self, model: &str, from: DateTime<Utc>, entry: PricingEntry) {
        let versions = self.models.entry(model.to_string()).or_default();
        versions.push(PricingVersion {
            effective_from: Some(from),
            entry,
        });
        versions.sort_by_key(|v| v.effective_from);
    }

    /// Strips a trailing date-like segment (8+ digits) when doing so turns an
    /// unknown name into a known one, e.g. "claude-opus-4-5-20251101" ->
    /// "claude-opus-4-5". Unknown names pass through unchanged.
    pub fn normalize<'a>(&self, raw: &'a str) -> &'a str {
        if self.models.contains_key(raw) {
            return raw;
        }
        if let Some(idx) = raw.rfind('-') {
            let last = &raw[idx + 1..];
            if last.len() >= 8
                && !last.is_empty()
                && last.bytes().all(|b| b.is_ascii_digit())
                && self.models.contains_key(&raw[..idx])
            {
                return &raw[..idx];
            }
        }
        raw
    }

    /// Resolves the price entry in effect at `at`. `None` resolves to the
    /// latest known entry. Returns `None` for unknown models.
    pub fn lookup_at(&self, model: &str, at: Option<DateTime<Utc>>) -> Option<&PricingEntry> {
        let versions = self.models.get(self.normalize(model))?;
        let at = match at {
            Some(at) => at,
            None => return versions.last().map(|v| &v.entry),
        };
        let idx = versions.partition_point(|v| match v.effective_from {
            None => true,
            Some(from) => from <= at,
        });
        if idx == 0 {
            // Before the first dated entry: fall back to the earliest known
            // price rather than billing nothing.
            return versions.first().map(|v| &v.entry);
        }
        Some(&versions[idx - 1].entry)
    }

    /// Estimated USD cost of one call at a point in time. Unknown models
    /// contribute zero; use [`Pricing::lookup_at`] to distinguish.
    #[allow(clippy::too_many_arguments)]
    pub fn cost_at(
        &self,
        model: &str,
        at: Option<DateTime<Utc>>,
        input_tokens: u64,
        output_tokens: u64,
        cache_5m: u64,
        cache_1h: u64,
        cache_read: u64,
    ) -> f64 {
        let Some(entry) = self.lookup_at(model, at) else {
            return 0.0;
        };
        let mut cost = input_tokens as f64 * entry.input_per_mtok / 1_000_000.0;
        cost += output_tokens as f64 * entry.output_per_mtok / 1_000_000.0;
        cost += cache_5m as f64 * entry.cache_write_5m_per_mtok / 1_000_000.0;
        cost += cache_1h as f64 * entry.cache_write_1h_per_mtok / 1_000_000.0;
        cost += cache_read as f64 * entry.cache_read_per_mtok / 1_000_000.0;
        cost
    }

    /// How much the cache reads saved versus full input pricing.
    pub fn cache_savings_at(
        &self,
        model: &str,
        at: Option<DateTime<Utc>>,
        cache_read_tokens: u64,
    ) -> f64 {
        let Some(entry) = self.lookup_at(model, at) else {
            return 0.0;
        };
        let full = cache_read_tokens as f64 * entry.input_per_mtok / 1_000_000.0;
        let actual = cache_read_tokens as f64 * entry.cache_read_per_mtok / 1_000_000.0;
        full - actual
    }
}

fn apply_override(entry: &mut PricingEntry, ov: &PricingOverride) {
    if let Some(v) = ov.input_per_mtok {
        entry.input_per_mtok = v;
    }
    if let Some(v) = ov.output_per_mtok {
        entry.output_per_mtok = v;
    }
    if let Some(v) = ov.cache_write_5m_per_mtok {
        entry.cache_write_5m_per_mtok = v;
    }
    if let Some(v) = ov.cache_write_1h_per_mtok {
        entry.cache_write_1h_per_mtok = v;
    }
    if let Some(v) = ov.cache_read_per_mtok {
        entry.cache_read_per_mtok = v;
    }
}

fn default_table() -> Vec<(&'static str, PricingEntry)> {
    fn entry(
        input: f64,
        output: f64,
        w5m: f64,
        w1h: f64,
        read: f64,
        long_in: f64,
        long_out: f64,
    ) -> PricingEntry {
        PricingEntry {
            input_per_mtok: input,
            output_per_mtok: output,
            cache_write_5m_per_mtok: w5m,
            cache_write_1h_per_mtok: w1h,
            cache_read_per_mtok: read,
            long_input_per_mtok: long_in,
            long_output_per_mtok: long_out,
        }
    }

    vec![
        (
            "claude-opus-4-6",
            entry(5.00, 25.00, 6.25, 10.00, 0.50, 10.00, 37.50),
        ),
        (
            "claude-opus-4-5",
            entry(5.00, 25.00, 6.25, 10.00, 0.50, 10.00, 37.50),
        ),
        (
            "claude-opus-4-1",
            entry(15.00, 75.00, 18.75, 30.00, 1.50, 30.00, 112.50),
        ),
        (
            "claude-opus-4",
            entry(15.00, 75.00, 18.75, 30.00, 1.50, 30.00, 112.50),
        ),
        (
            "claude-sonnet-4-6",
            entry(3.00, 15.00, 3.75, 6.00, 0.30, 6.00, 22.50),
        ),
        (
            "claude-sonnet-4-5",
            entry(3.00, 15.00, 3.75, 6.00, 0.30, 6.00, 22.50),
        ),
        (
            "claude-sonnet-4",
            entry(3.00, 15.00, 3.75, 6.00, 0.30, 6.00, 22.50),
        ),
        (
            "claude-haiku-4-5",
            entry(1.00, 5.00, 1.25, 2.00, 0.10, 2.00, 7.50),
        ),
        (
            "claude-haiku-3-5",
            entry(0.80, 4.00, 1.00, 1.60, 0.08, 1.60, 6.00),
        ),
    ]
}
