use anyhow::Context as _;
use chrono::{DateTime, Local, Utc};
use cburn_core::{
    SessionStats, aggregate, aggregate_cost_breakdown, aggregate_days, aggregate_hourly,
    aggregate_models, aggregate_projects, filter_by_model, filter_by_project, group_subagents,
};
use cburn_store::Cache;
use ingest::{load, load_with_cache};
use serde::Serialize;
use tracing::warn;

use crate::Context;

/// One row of `cburn sessions`: an enriched parent (or orphan) plus how many
/// subagent sessions were folded into it.
#[derive(Serialize)]
struct SessionRow {
    #[serde(flatten)]
    stats: SessionStats,
    subagent_count: usize,
}

#[derive(Serialize)]
struct Window {
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    days: i64,
}

pub fn summary(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    let stats = aggregate(&sessions, since, until, &ctx.pricing);

    #[derive(Serialize)]
    struct Out {
        window: Window,
        summary: cburn_core::SummaryStats,
        #[serde(skip_serializing_if = "Option::is_none")]
        budget_monthly_usd: Option<f64>,
    }
    print_json(&Out {
        window: Window {
            since,
            until,
            days: ctx.days,
        },
        summary: stats,
        budget_monthly_usd: ctx.budget_monthly_usd,
    })
}

pub fn daily(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    print_json(&aggregate_days(&sessions, since, until))
}

pub fn models(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    print_json(&aggregate_models(&sessions, since, until))
}

pub fn projects(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    print_json(&aggregate_projects(&sessions, since, until))
}

pub fn hourly(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    print_json(&aggregate_hourly(&sessions, since, until))
}

pub fn costs(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    let (totals, models) = aggregate_cost_breakdown(&sessions, since, until, &ctx.pricing);

    #[derive(Serialize)]
    struct Out {
        totals: cburn_core::TokenTypeCosts,
        models: Vec<cburn_core::ModelCostRow>,
    }
    print_json(&Out { totals, models })
}

pub fn sessions(ctx: &Context) -> anyhow::Result<()> {
    let sessions = load_sessions(ctx)?;
    let (since, until) = window(ctx);
    let in_window: Vec<SessionStats> = cburn_core::filter_by_time(&sessions, since, until)
        .into_iter()
        .cloned()
        .collect();

    let (parents, sub_map) = group_subagents(&in_window);
    let mut rows: Vec<SessionRow> = parents
        .into_iter()
        .filter(|s| s.api_calls > 0)
        .map(|stats| {
            let subagent_count = sub_map.get(&stats.session_id).map_or(0, Vec::len);
            SessionRow {
                stats,
                subagent_count,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.stats.start_time.cmp(&a.stats.start_time));

    print_json(&rows)
}

/// Loads sessions for the effective settings, preferring the metric cache
/// and degrading to a plain reparse when it is unavailable.
pub fn load_sessions(ctx: &Context) -> anyhow::Result<Vec<SessionStats>> {
    let mut sessions = if ctx.use_cache {
        match Cache::open(ingest::cache_path()) {
            Ok(mut cache) => {
                match load_with_cache(
                    &ctx.data_dir,
                    ctx.include_subagents,
                    &mut cache,
                    &ctx.pricing,
                    None,
                ) {
                    Ok(result) => Some(result.sessions),
                    Err(err) => {
                        warn!("cached load failed, retrying uncached: {err}");
                        None
                    }
                }
            }
            Err(err) => {
                warn!("metric cache unavailable, loading uncached: {err}");
                None
            }
        }
    } else {
        None
    };

    if sessions.is_none() {
        sessions = Some(
            load(&ctx.data_dir, ctx.include_subagents, &ctx.pricing, None)
                .with_context(|| format!("loading {}", ctx.data_dir.display()))?
                .sessions,
        );
    }

    let mut sessions = sessions.unwrap_or_default();
    if !ctx.project.is_empty() {
        sessions = filter_by_project(sessions, &ctx.project);
    }
    if !ctx.model.is_empty() {
        sessions = filter_by_model(sessions, &ctx.model);
    }
    Ok(sessions)
}

pub fn window(ctx: &Context) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Local::now().with_timezone(&Utc);
    (now - chrono::Duration::days(ctx.days), now)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
