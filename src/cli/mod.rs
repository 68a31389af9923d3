pub mod config;
pub mod leader;
pub mod lock;
pub mod paths;

use clap::{Parser, Subcommand};

use crate::agentapi::ApiError;
use crate::concurrency::{LockError, ScopeError};
use crate::config::ConfigError;

#[derive(Parser)]
#[command(name = "hostlock")]
#[command(author, version, about = "Machine-local named locks coordinated by a leader process")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "HOSTLOCK_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire, inspect and release named locks
    Lock(lock::LockArgs),

    /// Run or manage the leader that owns the lock table
    Leader(leader::LeaderArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved directory paths
    Paths,
}

/// Process exit codes.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    /// Anything not covered below.
    pub const FAILURE: u8 = 1;
    /// Unsupported scope, bad duration, unreadable config.
    pub const CONFIG: u8 = 2;
    /// Leader not reachable or the connection broke.
    pub const UNAVAILABLE: u8 = 3;
    /// Gave up waiting: deadline exceeded or interrupted.
    pub const TIMED_OUT: u8 = 4;
    /// Release found the lock in an unexpected state.
    pub const INVALID_STATE: u8 = 5;
}

/// Map an error to an exit code by the first recognised cause in its chain.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<ScopeError>() || cause.is::<ConfigError>() {
            return exit_codes::CONFIG;
        }
        if let Some(lock_err) = cause.downcast_ref::<LockError>() {
            return match lock_err {
                LockError::InvalidState { .. } => exit_codes::INVALID_STATE,
                LockError::Api(api_err) => api_exit_code(api_err),
            };
        }
        if let Some(api_err) = cause.downcast_ref::<ApiError>() {
            return api_exit_code(api_err);
        }
    }
    exit_codes::FAILURE
}

fn api_exit_code(err: &ApiError) -> u8 {
    if err.is_timeout() {
        exit_codes::TIMED_OUT
    } else {
        exit_codes::UNAVAILABLE
    }
}
