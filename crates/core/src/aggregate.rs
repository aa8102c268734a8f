use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};

use crate::pricing::Pricing;
use crate::types::{
    DailyStats, HourlyStats, MinuteStats, ModelStats, ProjectStats, SessionStats, SummaryStats,
    cache_hit_rate,
};

/// Keeps sessions whose start time falls within `[since, until)`.
/// Sessions without a start time are dropped.
pub fn filter_by_time(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<&SessionStats> {
    sessions
        .iter()
        .filter(|s| match s.start_time {
            Some(start) => start >= since && start < until,
            None => false,
        })
        .collect()
}

/// Keeps sessions whose project name contains the filter, case-insensitively.
pub fn filter_by_project(sessions: Vec<SessionStats>, project: &str) -> Vec<SessionStats> {
    if project.is_empty() {
        return sessions;
    }
    let needle = project.to_lowercase();
    sessions
        .into_iter()
        .filter(|s| s.project.to_lowercase().contains(&needle))
        .collect()
}

/// Keeps sessions with at least one call to a matching model.
pub fn filter_by_model(sessions: Vec<SessionStats>, model: &str) -> Vec<SessionStats> {
    if model.is_empty() {
        return sessions;
    }
    let needle = model.to_lowercase();
    sessions
        .into_iter()
        .filter(|s| s.models.keys().any(|m| m.to_lowercase().contains(&needle)))
        .collect()
}

/// Computes the summary rollup over `[since, until)`, including cache
/// savings and per-active-day rates. An active day is any local calendar day
/// containing a session start.
pub fn aggregate(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    pricing: &Pricing,
) -> SummaryStats {
    let filtered = filter_by_time(sessions, since, until);

    let mut stats = SummaryStats::default();
    let mut active_days: HashSet<NaiveDate> = HashSet::new();

    for s in &filtered {
        stats.total_sessions += 1;
        stats.total_prompts += s.user_messages;
        stats.total_api_calls += s.api_calls;
        stats.total_duration_secs += s.duration_secs;

        stats.input_tokens += s.input_tokens;
        stats.output_tokens += s.output_tokens;
        stats.cache_creation_5m_tokens += s.cache_creation_5m_tokens;
        stats.cache_creation_1h_tokens += s.cache_creation_1h_tokens;
        stats.cache_read_tokens += s.cache_read_tokens;
        stats.estimated_cost += s.estimated_cost;

        if let Some(start) = s.start_time {
            active_days.insert(start.with_timezone(&Local).date_naive());
        }
    }

    stats.active_days = active_days.len() as u64;
    stats.total_billed_tokens = stats.input_tokens
        + stats.output_tokens
        + stats.cache_creation_5m_tokens
        + stats.cache_creation_1h_tokens;
    stats.cache_hit_rate = cache_hit_rate(
        stats.cache_read_tokens,
        stats.cache_creation_5m_tokens,
        stats.cache_creation_1h_tokens,
        stats.input_tokens,
    );

    for s in &filtered {
        for (model, usage) in &s.models {
            stats.cache_savings += pricing.cache_savings_at(model, None, usage.cache_read_tokens);
        }
    }

    if stats.active_days > 0 {
        let days = stats.active_days as f64;
        stats.cost_per_day = stats.estimated_cost / days;
        stats.tokens_per_day = (stats.total_billed_tokens as f64 / days) as u64;
        stats.sessions_per_day = stats.total_sessions as f64 / days;
        stats.prompts_per_day = stats.total_prompts as f64 / days;
        stats.minutes_per_day = stats.total_duration_secs as f64 / 60.0 / days;
    }

    stats
}

/// One row per local calendar day in `[since, until]`, zero-filled for empty
/// days, newest first.
pub fn aggregate_days(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<DailyStats> {
    let filtered = filter_by_time(sessions, since, until);

    let mut day_map: HashMap<NaiveDate, DailyStats> = HashMap::new();

    for s in &filtered {
        let Some(start) = s.start_time else { continue };
        let date = start.with_timezone(&Local).date_naive();
        let ds = day_map.entry(date).or_insert_with(|| DailyStats::empty(date));
        ds.sessions += 1;
        ds.prompts += s.user_messages;
        ds.api_calls += s.api_calls;
        ds.duration_secs += s.duration_secs;
        ds.input_tokens += s.input_tokens;
        ds.output_tokens += s.output_tokens;
        ds.cache_creation_5m_tokens += s.cache_creation_5m_tokens;
        ds.cache_creation_1h_tokens += s.cache_creation_1h_tokens;
        ds.cache_read_tokens += s.cache_read_tokens;
        ds.estimated_cost += s.estimated_cost;
    }

    // Fill every day in the window so charts show gaps as zeros.
    let first = since.with_timezone(&Local).date_naive();
    let last = until.with_timezone(&Local).date_naive();
    let mut day = first;
    while day <= last {
        day_map.entry(day).or_insert_with(|| DailyStats::empty(day));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    let mut days: Vec<DailyStats> = day_map.into_values().collect();
    days.sort_by(|a, b| b.date.cmp(&a.date));
    days
}

/// Per-model rollup sorted by cost descending. Share percent is the model's
/// share of API calls, not of cost.
pub fn aggregate_models(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<ModelStats> {
    let filtered = filter_by_time(sessions, since, until);

    let mut model_map: HashMap<&str, ModelStats> = HashMap::new();
    let mut total_calls: u64 = 0;

    for s in &filtered {
        for (model, usage) in &s.models {
            let ms = model_map.entry(model.as_str()).or_insert_with(|| ModelStats {
                model: model.clone(),
                ..ModelStats::default()
            });
            ms.api_calls += usage.api_calls;
            ms.input_tokens += usage.input_tokens;
            ms.output_tokens += usage.output_tokens;
            ms.cache_creation_5m_tokens += usage.cache_creation_5m_tokens;
            ms.cache_creation_1h_tokens += usage.cache_creation_1h_tokens;
            ms.cache_read_tokens += usage.cache_read_tokens;
            ms.estimated_cost += usage.estimated_cost;
            total_calls += usage.api_calls;
        }
    }

    let mut models: Vec<ModelStats> = model_map.into_values().collect();
    if total_calls > 0 {
        for ms in &mut models {
            ms.share_percent = ms.api_calls as f64 / total_calls as f64 * 100.0;
        }
    }
    models.sort_by(|a, b| b.estimated_cost.total_cmp(&a.estimated_cost));
    models
}

/// Per-project rollup sorted by cost descending.
pub fn aggregate_projects(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<ProjectStats> {
    let filtered = filter_by_time(sessions, since, until);

    let mut proj_map: HashMap<&str, ProjectStats> = HashMap::new();

    for s in &filtered {
        let ps = proj_map
            .entry(s.project.as_str())
            .or_insert_with(|| ProjectStats {
                project: s.project.clone(),
                ..ProjectStats::default()
            });
        ps.sessions += 1;
        ps.prompts += s.user_messages;
        ps.total_tokens += s.input_tokens
            + s.output_tokens
            + s.cache_creation_5m_tokens
            + s.cache_creation_1h_tokens;
        ps.estimated_cost += s.estimated_cost;
    }

    let mut projects: Vec<ProjectStats> = proj_map.into_values().collect();
    projects.sort_by(|a, b| b.estimated_cost.total_cmp(&a.estimated_cost));
    projects
}

/// 24 fixed buckets keyed by the session start hour in local time. All
/// prompts and tokens are attributed to the start hour.
pub fn aggregate_hourly(
    sessions: &[SessionStats],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<HourlyStats> {
    let filtered = filter_by_time(sessions, since, until);

    let mut hours: Vec<HourlyStats> = (0..24)
        .map(|hour| HourlyStats {
            hour,
            ..HourlyStats::default()
        })
        .collect();

    for s in &filtered {
        let Some(start) = s.start_time else { continue };
        let h = start.with_timezone(&Local).hour() as usize;
        hours[h].prompts += s.user_messages;
        hours[h].sessions += 1;
        hours[h].tokens += s.input_tokens + s.output_tokens;
    }

    hours
}

/// 24 hourly buckets for the local calendar day containing `now`.
pub fn aggregate_today_hourly(sessions: &[SessionStats], now: DateTime<Local>) -> Vec<HourlyStats> {
    let today = now.date_naive();

    let mut hours: Vec<HourlyStats> = (0..24)
        .map(|hour| HourlyStats {
            hour,
            ..HourlyStats::default()
        })
        .collect();

    for s in sessions {
        let Some(start) = s.start_time else { continue };
        let local = start.with_timezone(&Local);
        if local.date_naive() != today || local > now {
            continue;
        }
        let h = local.hour() as usize;
        hours[h].prompts += s.user_messages;
        hours[h].sessions += 1;
        hours[h].tokens += s.input_tokens + s.output_tokens;
    }
    hours
}

/// 12 five-minute buckets for the trailing hour. Bucket 11 is the most
/// recent five minutes; indexes are clamped into range.
pub fn aggregate_last_hour(sessions: &[SessionStats], now: DateTime<Local>) -> Vec<MinuteStats> {
    let hour_ago = now - chrono::Duration::hours(1);

    let mut buckets: Vec<MinuteStats> = (0..12)
        .map(|minute| MinuteStats { minute, tokens: 0 })
        .collect();

    for s in sessions {
        let Some(start) = s.start_time else { continue };
        let local = start.with_timezone(&Local);
        if local < hour_ago || local >= now {
            continue;
        }
        let minutes_ago = (now - local).num_minutes();
        let idx = (11 - minutes_ago / 5).clamp(0, 11) as usize;
        buckets[idx].tokens += s.input_tokens + s.output_tokens;
    }
    buckets
}
