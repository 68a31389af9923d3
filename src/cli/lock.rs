//! CLI subcommand: `hostlock lock {acquire,get,release}`

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::agentapi::{Client, Context, leader_path};
use crate::concurrency::{LockError, LockScope, MachineLock};
use crate::config::{Config, parse_duration, resolve_dir};

const ACQUIRE_HELP: &str = "\
Acquires the lock for the given key. `lock acquire` will wait (potentially
forever) until it can acquire the lock, if the lock is already held by
another process. If multiple processes are waiting for the same lock, there
is no ordering guarantee of which one will be given the lock next.

Examples:

   $ hostlock lock acquire llama
   $ critical_section
   $ hostlock lock release llama";

const GET_HELP: &str = "\
Retrieves the value of a lock key. Any key not in use returns an empty
string.

`lock get` is generally only useful for inspecting lock state, as the value
can change concurrently. To acquire or release a lock, use `lock acquire` and
`lock release`.

Examples:

   $ hostlock lock get llama
   acquired";

const RELEASE_HELP: &str = "\
Releases the lock for the given key. This should only be called by the
process that acquired the lock.

Examples:

   $ hostlock lock acquire llama
   $ critical_section
   $ hostlock lock release llama";

#[derive(Args)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommands,
}

/// Options shared by every lock subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct LockCommonArgs {
    /// Lock scope; only "machine" is supported
    #[arg(long, env = "HOSTLOCK_LOCK_SCOPE")]
    pub lock_scope: Option<String>,

    /// Directory containing the leader socket
    #[arg(long, env = "HOSTLOCK_SOCKETS_PATH")]
    pub sockets_path: Option<String>,
}

#[derive(Subcommand)]
pub enum LockCommands {
    /// Acquires a lock from the leader
    #[command(long_about = ACQUIRE_HELP)]
    Acquire {
        /// Lock key
        key: String,

        #[command(flatten)]
        common: LockCommonArgs,

        /// Maximum time to wait for the lock, e.g. "30s", "1m30s" or "1.5h" (0 = forever)
        #[arg(long, env = "HOSTLOCK_LOCK_WAIT_TIMEOUT", value_parser = parse_duration)]
        lock_wait_timeout: Option<Duration>,
    },

    /// Gets a lock value from the leader
    #[command(long_about = GET_HELP)]
    Get {
        /// Lock key
        key: String,

        #[command(flatten)]
        common: LockCommonArgs,
    },

    /// Releases a previously-acquired lock
    #[command(long_about = RELEASE_HELP)]
    Release {
        /// Lock key
        key: String,

        #[command(flatten)]
        common: LockCommonArgs,
    },
}

/// Where and how to reach the leader, after flags, env and config are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    pub scope: LockScope,
    pub leader_path: PathBuf,
}

pub async fn run(args: LockArgs, config_override: Option<&str>) -> Result<()> {
    let config = Config::load_with_override(config_override)?;

    match args.command {
        LockCommands::Acquire {
            key,
            common,
            lock_wait_timeout,
        } => acquire(&config, &common, &key, lock_wait_timeout).await,
        LockCommands::Get { key, common } => get(&config, &common, &key).await,
        LockCommands::Release { key, common } => release(&config, &common, &key).await,
    }
}

async fn acquire(
    config: &Config,
    common: &LockCommonArgs,
    key: &str,
    wait_timeout: Option<Duration>,
) -> Result<()> {
    let target = resolve_target(config, common)?;
    let wait_timeout = match wait_timeout {
        Some(timeout) => timeout,
        None => config.wait_timeout()?,
    };

    let ctx = wait_context(&interruptible_context(), wait_timeout);
    let client = connect(&ctx, &target).await?;

    match MachineLock::new(&client, key).acquire(&ctx).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout() => {
            Err(anyhow::Error::new(e).context("Exceeded deadline or context cancelled"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("Error performing compare-and-swap")),
    }
}

async fn get(config: &Config, common: &LockCommonArgs, key: &str) -> Result<()> {
    let target = resolve_target(config, common)?;
    let ctx = interruptible_context();
    let client = connect(&ctx, &target).await?;

    let value = MachineLock::new(&client, key)
        .get(&ctx)
        .await
        .context("Error from leader client")?;
    println!("{}", value);
    Ok(())
}

async fn release(config: &Config, common: &LockCommonArgs, key: &str) -> Result<()> {
    let target = resolve_target(config, common)?;
    let ctx = interruptible_context();
    let client = connect(&ctx, &target).await?;

    match MachineLock::new(&client, key).release(&ctx).await {
        Ok(()) => Ok(()),
        Err(e @ LockError::InvalidState { .. }) => Err(e.into()),
        Err(e) => Err(anyhow::Error::new(e).context("Error performing compare-and-swap")),
    }
}

/// Merge flags/env with the config file and validate the scope.
///
/// Runs before any connection attempt, so a bad scope never reaches the leader.
pub fn resolve_target(config: &Config, common: &LockCommonArgs) -> Result<LockTarget> {
    let scope: LockScope = common
        .lock_scope
        .as_deref()
        .unwrap_or(&config.lock.scope)
        .parse()?;

    let sockets_dir = match common.sockets_path.as_deref() {
        Some(raw) => resolve_dir(raw)?,
        None => config.sockets_dir()?,
    };

    let target = LockTarget {
        scope,
        leader_path: leader_path(&sockets_dir),
    };
    debug!(scope = %target.scope, leader = %target.leader_path.display(), "Resolved lock target");
    Ok(target)
}

/// Bound `base` by the wait timeout. Zero means wait indefinitely.
pub fn wait_context(base: &Context, wait_timeout: Duration) -> Context {
    if wait_timeout.is_zero() {
        base.child()
    } else {
        base.with_timeout(wait_timeout)
    }
}

/// A context cancelled by Ctrl-C.
fn interruptible_context() -> Context {
    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    ctx
}

async fn connect(ctx: &Context, target: &LockTarget) -> Result<Client> {
    Client::new(ctx, &target.leader_path).await.with_context(|| {
        format!(
            "Could not connect to the lock leader at {}. Is `hostlock leader start` running?",
            target.leader_path.display()
        )
    })
}
