//! Leader-mediated lock service.
//!
//! One process per host runs a [`Server`] that owns the [`LockStore`]. Every
//! process, the leader included, talks to it through a [`Client`] over a
//! Unix domain socket at [`leader_path`]. The store offers two operations,
//! `Get` and `CompareAndSwap`; lock semantics are layered on top by
//! [`crate::concurrency`].
//!
//! Ordering is only guaranteed within one connection. Requests arriving on
//! different connections race for the store's critical section in no
//! particular order.

mod client;
mod context;
mod error;
pub mod protocol;
mod server;
mod store;

use std::path::{Path, PathBuf};

pub use client::Client;
pub use context::Context;
pub use error::ApiError;
pub use server::Server;
pub use store::{LockStore, UNLOCKED};

/// File name of the leader socket inside the sockets directory.
pub const LEADER_SOCKET_NAME: &str = "agent-leader.sock";

/// Where the leader listens, given the configured sockets directory.
pub fn leader_path(sockets_dir: &Path) -> PathBuf {
    sockets_dir.join(LEADER_SOCKET_NAME)
}
