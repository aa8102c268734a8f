use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One deduplicated API request (final state of a message id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub message_id: String,
    pub model: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub service_tier: String,
    pub estimated_cost: f64,
}

/// Per-model token usage within a session, keyed by normalized model name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub estimated_cost: f64,
}

impl ModelUsage {
    pub fn add(&mut self, other: &ModelUsage) {
        self.api_calls += other.api_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_5m_tokens += other.cache_creation_5m_tokens;
        self.cache_creation_1h_tokens += other.cache_creation_1h_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.estimated_cost += other.estimated_cost;
    }
}

/// Aggregated metrics for a single session log file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub project: String,
    pub project_path: String,
    pub file_path: String,
    pub is_subagent: bool,
    pub parent_session: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,

    pub user_messages: u64,
    pub api_calls: u64,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,

    pub models: HashMap<String, ModelUsage>,

    pub estimated_cost: f64,
    pub cache_hit_rate: f64,
}

impl SessionStats {
    /// Cache hit rate over all input-class tokens, 0 when no input was seen.
    pub fn compute_cache_hit_rate(&self) -> f64 {
        cache_hit_rate(
            self.cache_read_tokens,
            self.cache_creation_5m_tokens,
            self.cache_creation_1h_tokens,
            self.input_tokens,
        )
    }
}

pub(crate) fn cache_hit_rate(cache_read: u64, cache_5m: u64, cache_1h: u64, input: u64) -> f64 {
    let total = cache_read + cache_5m + cache_1h + input;
    if total > 0 {
        cache_read as f64 / total as f64
    } else {
        0.0
    }
}

/// Top-level aggregate across a session set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_sessions: u64,
    pub total_prompts: u64,
    pub total_api_calls: u64,
    pub total_duration_secs: i64,
    pub active_days: u64,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_billed_tokens: u64,

    pub estimated_cost: f64,
    pub cache_savings: f64,
    pub cache_hit_rate: f64,

    pub cost_per_day: f64,
    pub tokens_per_day: u64,
    pub sessions_per_day: f64,
    pub prompts_per_day: f64,
    pub minutes_per_day: f64,
}

/// Metrics for a single calendar day (local time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub sessions: u64,
    pub prompts: u64,
    pub api_calls: u64,
    pub duration_secs: i64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub estimated_cost: f64,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            sessions: 0,
            prompts: 0,
            api_calls: 0,
            duration_secs: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_5m_tokens: 0,
            cache_creation_1h_tokens: 0,
            cache_read_tokens: 0,
            estimated_cost: 0.0,
        }
    }
}

/// Aggregated metrics for a single model across sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model: String,
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub estimated_cost: f64,
    pub share_percent: f64,
}

/// Aggregated metrics for a single project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project: String,
    pub sessions: u64,
    pub prompts: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

/// Prompt, session, and token counts for one hour of the day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyStats {
    pub hour: u32,
    pub prompts: u64,
    pub sessions: u64,
    pub tokens: u64,
}

/// Token counts for one five-minute bucket of the trailing hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteStats {
    pub minute: usize,
    pub tokens: u64,
}
