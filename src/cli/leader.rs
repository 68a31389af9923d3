//! CLI subcommand: `hostlock leader {start,stop,status}`
//!
//! The leader owns the lock table for this machine. It is an ordinary
//! process; background mode forks with `daemonize` before tokio starts.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(unix)]
use daemonize::Daemonize;

use crate::agentapi::{self, Client, Context, Server};
use crate::config::{Config, resolve_dir};
use crate::paths::create_dir_with_mode;

const STOP_WAIT: Duration = Duration::from_secs(5);
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Args)]
pub struct LeaderArgs {
    #[command(subcommand)]
    pub command: LeaderCommands,
}

#[derive(Subcommand)]
pub enum LeaderCommands {
    /// Start the leader
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Directory to create the leader socket in
        #[arg(long, env = "HOSTLOCK_SOCKETS_PATH")]
        sockets_path: Option<String>,
    },

    /// Stop a background leader
    Stop,

    /// Show leader status
    Status {
        /// Directory containing the leader socket
        #[arg(long, env = "HOSTLOCK_SOCKETS_PATH")]
        sockets_path: Option<String>,
    },
}

pub async fn run(args: LeaderArgs, config_override: Option<&str>) -> Result<()> {
    let config = Config::load_with_override(config_override)?;

    match args.command {
        LeaderCommands::Start {
            foreground,
            sockets_path,
        } => start_leader(&config, foreground, sockets_path.as_deref()).await,
        LeaderCommands::Stop => stop_leader(&config).await,
        LeaderCommands::Status { sockets_path } => {
            show_status(&config, sockets_path.as_deref()).await
        }
    }
}

/// Fork and daemonize BEFORE starting the Tokio runtime.
#[cfg(unix)]
pub fn daemonize_and_run(config_override: Option<&str>, sockets_path: Option<&str>) -> Result<()> {
    let config = Config::load_with_override(config_override)?;
    let sockets_dir = sockets_dir(&config, sockets_path)?;
    let socket = agentapi::leader_path(&sockets_dir);

    let pid_file = config.paths.pid_file();
    check_not_running(&pid_file, &socket)?;
    if let Some(parent) = pid_file.parent()
        && !parent.exists()
    {
        create_dir_with_mode(parent)?;
    }

    let log_file = get_log_file(&config)?;

    println!("Starting hostlock leader in background...");
    println!("  Socket:   {}", socket.display());
    println!("  PID file: {}", pid_file.display());
    println!("  Log file: {}", log_file.display());
    println!("\nUse 'hostlock leader status' to check status");
    println!("Use 'hostlock leader stop' to stop\n");

    // Append so restarts within a day share one file
    let stdout = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;
    let stderr = stdout.try_clone()?;

    let daemonize = Daemonize::new()
        .pid_file(&pid_file)
        .working_directory(std::env::current_dir()?)
        .stdout(stdout)
        .stderr(stderr);

    match daemonize.start() {
        Ok(_) => {
            // Child process: safe to start Tokio now
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run_leader_server(config, sockets_dir))
        }
        Err(e) => anyhow::bail!("Failed to daemonize: {}", e),
    }
}

/// Body of a background leader, after the fork.
#[cfg(unix)]
async fn run_leader_server(config: Config, sockets_dir: PathBuf) -> Result<()> {
    // stdout is the log file here
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(false)
        .init();

    let result = run_leader(&sockets_dir).await;
    fs::remove_file(config.paths.pid_file()).ok();
    if let Err(ref e) = result {
        tracing::error!("Leader exited with error: {:#}", e);
    }
    result
}

async fn start_leader(config: &Config, foreground: bool, sockets_path: Option<&str>) -> Result<()> {
    // Background mode on Unix is handled by daemonize_and_run() before Tokio starts
    if !foreground {
        anyhow::bail!("Background mode must be started before the async runtime");
    }

    let sockets_dir = sockets_dir(config, sockets_path)?;
    let socket = agentapi::leader_path(&sockets_dir);
    let pid_file = config.paths.pid_file();
    check_not_running(&pid_file, &socket)?;

    if let Some(parent) = pid_file.parent()
        && !parent.exists()
    {
        create_dir_with_mode(parent)?;
    }
    fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("Failed to write PID file {}", pid_file.display()))?;

    eprintln!("hostlock leader listening on {}", socket.display());
    let result = run_leader(&sockets_dir).await;

    fs::remove_file(&pid_file).ok();
    result
}

/// Bind the endpoint under `sockets_dir` and serve until SIGINT or SIGTERM.
async fn run_leader(sockets_dir: &Path) -> Result<()> {
    if !sockets_dir.exists() {
        create_dir_with_mode(sockets_dir)?;
    }

    let server = Server::bind(agentapi::leader_path(sockets_dir))?;
    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone())?;

    let result = server.serve(shutdown).await;
    signals.abort();
    result?;

    info!("Leader stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    }))
}

async fn stop_leader(config: &Config) -> Result<()> {
    let pid_file = config.paths.pid_file();

    let Some(pid) = read_pid(&pid_file)? else {
        println!("Leader is not running");
        return Ok(());
    };

    if !is_process_running(pid) {
        println!("Leader is not running (stale PID file)");
        fs::remove_file(&pid_file)?;
        return Ok(());
    }

    println!("Stopping leader (PID: {})...", pid);
    terminate(pid)?;

    let deadline = tokio::time::Instant::now() + STOP_WAIT;
    while is_process_running(pid) {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Failed to stop leader (PID: {})", pid);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("Leader stopped");
    fs::remove_file(&pid_file).ok();
    Ok(())
}

async fn show_status(config: &Config, sockets_path: Option<&str>) -> Result<()> {
    let pid_file = config.paths.pid_file();
    let socket = agentapi::leader_path(&sockets_dir(config, sockets_path)?);

    let pid = read_pid(&pid_file)?.filter(|pid| is_process_running(*pid));
    let ctx = Context::background().with_timeout(STATUS_PROBE_TIMEOUT);
    let probe = probe_leader(&ctx, &socket).await;

    println!("hostlock Leader Status");
    println!("----------------------");
    println!("Running:    {}", if pid.is_some() { "yes" } else { "no" });
    if let Some(pid) = pid {
        println!("PID:        {}", pid);
    }
    println!("Socket:     {}", socket.display());
    match probe {
        Ok(()) => println!("Responding: yes"),
        Err(e) => println!("Responding: no ({})", e),
    }

    Ok(())
}

/// One `Get` round trip to the endpoint at `socket`.
async fn probe_leader(ctx: &Context, socket: &Path) -> Result<(), agentapi::ApiError> {
    let client = Client::new(ctx, socket).await?;
    client.lock_get(ctx, "").await.map(|_| ())
}

fn sockets_dir(config: &Config, sockets_path: Option<&str>) -> Result<PathBuf> {
    match sockets_path {
        Some(raw) => resolve_dir(raw),
        None => config.sockets_dir(),
    }
}

/// Refuse to start when a leader is alive, clearing a stale PID file.
fn check_not_running(pid_file: &Path, socket: &Path) -> Result<()> {
    if let Some(pid) = read_pid(pid_file)? {
        if is_process_running(pid) {
            anyhow::bail!("Leader already running (PID: {})", pid);
        }
        fs::remove_file(pid_file)?;
    }

    if std::os::unix::net::UnixStream::connect(socket).is_ok() {
        anyhow::bail!("Another leader is already listening on {}", socket.display());
    }

    Ok(())
}

/// PID recorded in `pid_file`; an unparsable file counts as absent.
fn read_pid(pid_file: &Path) -> Result<Option<i32>> {
    if !pid_file.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(pid_file)
        .with_context(|| format!("Failed to read PID file {}", pid_file.display()))?;
    Ok(content.trim().parse().ok())
}

fn is_process_running(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only checks existence; EPERM means it exists under another user
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

fn terminate(pid: i32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to signal leader (PID: {})", pid))
}

#[cfg(unix)]
fn get_log_file(config: &Config) -> Result<PathBuf> {
    let logs_dir = config.paths.logs_dir();
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

    let retention_days = config.logging.retention_days;
    if retention_days > 0 {
        prune_old_logs(&logs_dir, i64::from(retention_days));
    }

    let date = chrono::Local::now().format("%Y-%m-%d");
    Ok(logs_dir.join(format!("hostlock-{}.log", date)))
}

/// Prune log files older than `keep_days` days
fn prune_old_logs(logs_dir: &Path, keep_days: i64) {
    let cutoff = chrono::Local::now() - chrono::Duration::days(keep_days);
    let cutoff_date = cutoff.format("%Y-%m-%d").to_string();

    if let Ok(entries) = fs::read_dir(logs_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            // hostlock-YYYY-MM-DD.log
            if let Some(date_part) = name_str
                .strip_prefix("hostlock-")
                .and_then(|s| s.strip_suffix(".log"))
                && date_part < cutoff_date.as_str()
            {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}
