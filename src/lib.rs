//! hostlock - machine-local named locks coordinated by a leader process
//!
//! This crate provides:
//! - A leader endpoint serving an in-memory lock table over a Unix socket
//! - A client and the acquire/release protocol built on compare-and-swap
//! - The `hostlock` command-line front end

#[cfg(not(unix))]
compile_error!("hostlock coordinates through Unix domain sockets and only builds on Unix");

pub mod agentapi;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod paths;

#[cfg(test)]
mod test_support;

pub use config::Config;
