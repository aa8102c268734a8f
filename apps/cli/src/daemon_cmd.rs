use std::fs;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context as _, bail};
use chrono::Utc;
use daemon::{DaemonConfig, RuntimeState, Service, Status};

use crate::{Context, DaemonAction, DaemonArgs};

pub fn run(ctx: &Context, args: DaemonArgs) -> anyhow::Result<()> {
    match args.action {
        Some(DaemonAction::Status) => status(&args),
        Some(DaemonAction::Stop) => stop(&args),
        None => {
            if args.detach && args.child {
                bail!("invalid daemon launch mode");
            }
            if args.detach {
                start_detached(&args)
            } else {
                run_foreground(ctx, &args)
            }
        }
    }
}

/// Re-executes the current binary with `--detach` stripped and `--child`
/// appended, wiring the log file up as stdout/stderr.
fn start_detached(args: &DaemonArgs) -> anyhow::Result<()> {
    let pid_file = args.pid_file();
    daemon::ensure_not_running(&pid_file)?;

    let exe = std::env::current_exe().context("resolve executable")?;
    let mut child_args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "--detach" && !arg.starts_with("--detach="))
        .collect();
    child_args.push("--child".to_string());

    let log_file = args.log_file();
    if let Some(dir) = pid_file.parent() {
        fs::create_dir_all(dir).context("create daemon directory")?;
    }
    if let Some(dir) = log_file.parent() {
        fs::create_dir_all(dir).context("create daemon log directory")?;
    }
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .context("open daemon log file")?;

    let child = Command::new(exe)
        .args(&child_args)
        .stdin(Stdio::null())
        .stdout(log.try_clone().context("clone log handle")?)
        .stderr(log)
        .spawn()
        .context("start detached daemon")?;

    println!("  Started daemon (pid {})", child.id());
    println!("  PID file: {}", pid_file.display());
    println!("  API: http://{}/v1/status", args.addr);
    println!("  Log: {}", log_file.display());
    Ok(())
}

fn run_foreground(ctx: &Context, args: &DaemonArgs) -> anyhow::Result<()> {
    let pid_file = args.pid_file();
    daemon::ensure_not_running(&pid_file)?;

    let pid = std::process::id() as i32;
    daemon::write_pid(&pid_file, pid).context("write pid file")?;
    let state = RuntimeState {
        pid,
        addr: args.addr.clone(),
        started_at: Utc::now(),
        data_dir: ctx.data_dir.to_string_lossy().into_owned(),
    };
    if let Err(err) = daemon::write_state(&daemon::state_path(&pid_file), &state) {
        tracing::warn!("writing daemon state sidecar failed: {err}");
    }

    let cfg = DaemonConfig {
        data_dir: ctx.data_dir.clone(),
        days: ctx.days,
        project_filter: ctx.project.clone(),
        model_filter: ctx.model.clone(),
        include_subagents: ctx.include_subagents,
        use_cache: ctx.use_cache,
        interval: Duration::from_secs(args.interval_secs),
        addr: args.addr.clone(),
        events_buffer: args.events_buffer,
    };
    let service = Service::new(cfg, ctx.pricing.clone());

    println!("  cburn daemon listening on http://{}", args.addr);
    println!(
        "  Polling every {}s from {}",
        service.config().interval.as_secs(),
        ctx.data_dir.display()
    );
    println!(
        "  Stop with: cburn daemon stop --pid-file {}",
        pid_file.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let result = runtime.block_on(service.run(shutdown_signal()));

    daemon::remove_control_files(&pid_file);
    result.map_err(Into::into)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn status(args: &DaemonArgs) -> anyhow::Result<()> {
    let pid_file = args.pid_file();
    let pid = match daemon::read_pid(&pid_file) {
        Ok(pid) => pid,
        Err(_) => {
            println!("  Daemon: not running (pid file not found)");
            return Ok(());
        }
    };

    if !daemon::process_alive(pid) {
        println!("  Daemon: stale pid file (pid {pid} not alive)");
        return Ok(());
    }

    let addr = daemon::read_state(&daemon::state_path(&pid_file))
        .map(|state| state.addr)
        .unwrap_or_else(|_| args.addr.clone());

    println!("  Daemon PID: {pid}");
    println!("  Address: http://{addr}");

    match probe_status(&addr) {
        Err(err) => println!("  API status: unreachable ({err})"),
        Ok(status) => {
            match status.last_poll_at {
                Some(at) => println!(
                    "  Last poll: {}",
                    at.with_timezone(&chrono::Local).to_rfc3339()
                ),
                None => println!("  Last poll: pending"),
            }
            println!("  Poll count: {}", status.poll_count);
            println!("  Sessions: {}", status.summary.sessions);
            println!("  Tokens: {}", status.summary.tokens);
            println!("  Cost: ${:.2}", status.summary.estimated_cost_usd);
            if !status.last_error.is_empty() {
                println!("  Last error: {}", status.last_error);
            }
        }
    }
    Ok(())
}

fn probe_status(addr: &str) -> anyhow::Result<Status> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let status = client
        .get(format!("http://{addr}/v1/status"))
        .send()?
        .error_for_status()?
        .json::<Status>()?;
    Ok(status)
}

fn stop(args: &DaemonArgs) -> anyhow::Result<()> {
    let pid = daemon::stop(&args.pid_file())?;
    println!("  Stopped daemon (pid {pid})");
    Ok(())
}
