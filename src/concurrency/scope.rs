use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace a lock lives in. Only machine-wide locks exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    #[default]
    Machine,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Only 'machine' scope for locks is supported in this version.")]
pub struct ScopeError {
    pub requested: String,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Machine => "machine",
        }
    }
}

impl FromStr for LockScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "machine" => Ok(LockScope::Machine),
            other => Err(ScopeError {
                requested: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
