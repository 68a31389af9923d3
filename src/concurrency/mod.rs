//! Lock semantics on top of the leader's compare-and-swap store.

mod machine_lock;
mod scope;

pub use machine_lock::{ACQUIRED, LockError, MachineLock, POLL_INTERVAL};
pub use scope::{LockScope, ScopeError};
