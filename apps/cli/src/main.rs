mod config;
mod daemon_cmd;
mod report;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Analyze local Claude Code session logs: token usage, estimated cost,
/// cache efficiency, and activity patterns.
#[derive(Parser)]
#[command(name = "cburn", version, about)]
struct Cli {
    /// Claude data directory (default: ~/.claude)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Time window in days for rollups
    #[arg(long, global = true)]
    days: Option<i64>,

    /// Case-insensitive project name filter
    #[arg(long, global = true)]
    project: Option<String>,

    /// Case-insensitive model name filter
    #[arg(long, global = true)]
    model: Option<String>,

    /// Bypass the metric cache and reparse everything
    #[arg(long, global = true)]
    no_cache: bool,

    /// Exclude subagent sessions
    #[arg(long, global = true)]
    no_subagents: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summary rollup over the time window
    Summary,
    /// Per-day breakdown, newest first
    Daily,
    /// Per-model breakdown sorted by cost
    Models,
    /// Per-project breakdown sorted by cost
    Projects,
    /// Prompt activity by hour of day
    Hourly,
    /// Cost breakdown by token class and model
    Costs,
    /// Session list with subagents folded into parents
    Sessions,
    /// Run a background usage daemon with HTTP/SSE endpoints
    Daemon(DaemonArgs),
}

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub action: Option<DaemonAction>,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub addr: String,

    /// Polling interval in seconds
    #[arg(long, default_value_t = 15)]
    pub interval_secs: u64,

    /// PID file path (default: <cache dir>/cburnd.pid)
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Log file path for detached mode (default: <cache dir>/cburnd.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Max in-memory events retained
    #[arg(long, default_value_t = 200)]
    pub events_buffer: usize,

    /// Run the daemon as a background process
    #[arg(long)]
    pub detach: bool,

    /// Internal: mark a detached child process
    #[arg(long, hide = true)]
    pub child: bool,
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Show daemon process and API status
    Status,
    /// Stop the running daemon
    Stop,
}

/// Effective settings after layering CLI flags over the config file.
pub struct Context {
    pub data_dir: PathBuf,
    pub days: i64,
    pub project: String,
    pub model: String,
    pub use_cache: bool,
    pub include_subagents: bool,
    pub pricing: cburn_core::Pricing,
    pub budget_monthly_usd: Option<f64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("cburn: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load()?;

    let ctx = Context {
        data_dir: cli
            .data_dir
            .or_else(|| cfg.general.claude_dir.clone())
            .unwrap_or_else(ingest::default_data_dir),
        days: cli.days.unwrap_or(cfg.general.default_days),
        project: cli.project.unwrap_or_default(),
        model: cli.model.unwrap_or_default(),
        use_cache: !cli.no_cache,
        include_subagents: if cli.no_subagents {
            false
        } else {
            cfg.general.include_subagents
        },
        pricing: cburn_core::Pricing::default().with_overrides(&cfg.pricing.overrides),
        budget_monthly_usd: cfg.budget.monthly_usd,
    };

    match cli.command {
        Command::Summary => report::summary(&ctx),
        Command::Daily => report::daily(&ctx),
        Command::Models => report::models(&ctx),
        Command::Projects => report::projects(&ctx),
        Command::Hourly => report::hourly(&ctx),
        Command::Costs => report::costs(&ctx),
        Command::Sessions => report::sessions(&ctx),
        Command::Daemon(args) => daemon_cmd::run(&ctx, args),
    }
}

impl DaemonArgs {
    pub fn pid_file(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| ingest::cache_path().with_file_name("cburnd.pid"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| ingest::cache_path().with_file_name("cburnd.log"))
    }
}
