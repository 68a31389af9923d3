//! Error taxonomy for the leader endpoint and its clients.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a round trip between a client and the leader endpoint.
///
/// The store itself cannot fail, so every variant here is about reaching the
/// leader, talking to it, or giving up on it.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Nothing accepted a connection at the leader socket path.
    #[error("no leader reachable at {}: {source}", path.display())]
    LeaderUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The endpoint could not claim its socket path.
    #[error("failed to bind leader socket at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The connection broke mid-call (reset, closed, write failure).
    #[error("leader connection failed: {0}")]
    Transport(#[from] io::Error),

    /// A frame could not be decoded, was oversized, or answered the wrong request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The endpoint answered with an error frame.
    #[error("leader rejected request: {0}")]
    Rejected(String),

    /// The caller's context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The caller's context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ApiError {
    /// True when the caller gave up, as opposed to the transport breaking.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Cancelled | ApiError::DeadlineExceeded)
    }

    /// True when the leader could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::LeaderUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_kinds_are_distinguishable_from_transport() {
        assert!(ApiError::Cancelled.is_timeout());
        assert!(ApiError::DeadlineExceeded.is_timeout());
        assert!(!ApiError::Transport(io::Error::from(io::ErrorKind::BrokenPipe)).is_timeout());
        assert!(!ApiError::Protocol("bad frame".into()).is_timeout());
    }

    #[test]
    fn unavailable_message_names_the_socket() {
        let err = ApiError::LeaderUnavailable {
            path: PathBuf::from("/run/hostlock/sockets/agent-leader.sock"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("agent-leader.sock"));
    }
}
