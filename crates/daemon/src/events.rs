use chrono::{DateTime, Utc};
use cburn_core::SummaryStats;
use serde::{Deserialize, Serialize};

/// Compact usage state captured at one poll instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub at: Option<DateTime<Utc>>,
    pub sessions: u64,
    pub prompts: u64,
    pub api_calls: u64,
    pub tokens: u64,
    pub estimated_cost_usd: f64,
    pub cache_hit_rate: f64,
    pub cost_per_day_usd: f64,
    pub tokens_per_day: u64,
    pub sessions_per_day: f64,
}

impl Snapshot {
    pub fn from_summary(stats: &SummaryStats, at: DateTime<Utc>) -> Self {
        Self {
            at: Some(at),
            sessions: stats.total_sessions,
            prompts: stats.total_prompts,
            api_calls: stats.total_api_calls,
            tokens: stats.total_billed_tokens,
            estimated_cost_usd: stats.estimated_cost,
            cache_hit_rate: stats.cache_hit_rate,
            cost_per_day_usd: stats.cost_per_day,
            tokens_per_day: stats.tokens_per_day,
            sessions_per_day: stats.sessions_per_day,
        }
    }

    /// Field-wise subtraction over the countable fields.
    pub fn diff(&self, prev: &Snapshot) -> Delta {
        Delta {
            sessions: self.sessions as i64 - prev.sessions as i64,
            prompts: self.prompts as i64 - prev.prompts as i64,
            api_calls: self.api_calls as i64 - prev.api_calls as i64,
            tokens: self.tokens as i64 - prev.tokens as i64,
            estimated_cost_usd: self.estimated_cost_usd - prev.estimated_cost_usd,
        }
    }
}

/// Snapshot deltas between two successive polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub sessions: i64,
    pub prompts: i64,
    pub api_calls: i64,
    pub tokens: i64,
    pub estimated_cost_usd: f64,
}

impl Delta {
    pub fn is_zero(&self) -> bool {
        self.sessions == 0
            && self.prompts == 0
            && self.api_calls == 0
            && self.tokens == 0
            && self.estimated_cost_usd == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Snapshot,
    UsageDelta,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::UsageDelta => "usage_delta",
        }
    }
}

/// Published whenever the usage snapshot changes. Ids are strictly
/// monotonic within one daemon process, not across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub snapshot: Snapshot,
    pub delta: Delta,
}

/// Served at `/v1/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub started_at: DateTime<Utc>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub poll_interval_sec: u64,
    pub poll_count: u64,
    pub data_dir: String,
    pub days: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_filter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_filter: String,
    pub summary: Snapshot,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    pub event_count: usize,
    pub subscriber_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_zero_detection() {
        assert!(Delta::default().is_zero());
        assert!(
            !Delta {
                tokens: 1,
                ..Delta::default()
            }
            .is_zero()
        );
    }

    #[test]
    fn event_kind_serializes_as_wire_name() {
        let ev = Event {
            id: 1,
            kind: EventKind::UsageDelta,
            timestamp: Utc::now(),
            snapshot: Snapshot::default(),
            delta: Delta::default(),
        };
        let json = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(json["type"], "usage_delta");
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn diff_subtracts_fieldwise() {
        let prev = Snapshot {
            sessions: 2,
            tokens: 1000,
            estimated_cost_usd: 1.0,
            ..Snapshot::default()
        };
        let curr = Snapshot {
            sessions: 3,
            tokens: 1500,
            estimated_cost_usd: 1.25,
            ..Snapshot::default()
        };
        let delta = curr.diff(&prev);
        assert_eq!(delta.sessions, 1);
        assert_eq!(delta.tokens, 500);
        assert!((delta.estimated_cost_usd - 0.25).abs() < 1e-9);
    }
}
