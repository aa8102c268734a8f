mod aggregate;
mod costs;
mod pricing;
mod subagents;
mod types;

pub use aggregate::{
    aggregate, aggregate_days, aggregate_hourly, aggregate_last_hour, aggregate_models,
    aggregate_projects, aggregate_today_hourly, filter_by_model, filter_by_project,
    filter_by_time,
};
pub use costs::{ModelCostRow, TokenTypeCosts, aggregate_cost_breakdown};
pub use pricing::{Pricing, PricingEntry, PricingOverride};
pub use subagents::group_subagents;
pub use types::{
    ApiCall, DailyStats, HourlyStats, MinuteStats, ModelStats, ModelUsage, ProjectStats,
    SessionStats, SummaryStats,
};
