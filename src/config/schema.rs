use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock scope: only "machine" is supported
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Directory holding the leader socket (default: runtime_dir/sockets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sockets_path: Option<String>,

    /// Maximum time `lock acquire` waits, e.g. "30s" (0 = wait forever)
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Days of background leader logs to keep (0 = keep forever)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_scope() -> String {
    "machine".to_string()
}
fn default_wait_timeout() -> String {
    "0s".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_retention_days() -> u32 {
    7
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            sockets_path: None,
            wait_timeout: default_wait_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            retention_days: default_retention_days(),
        }
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration such as "250ms", "1.5s", "1m30s", "2h" or a bare number
/// of seconds.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Components may
/// carry a decimal fraction and are summed. Signs are not accepted.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = s
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid duration '{}': {}", s, e))?;
        return Ok(Duration::from_secs(secs));
    }

    let too_large = || anyhow::anyhow!("invalid duration '{}': too large", s);
    let mut rest = s;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let (whole, after) = split_digits(rest);
        let (fraction, after) = match after.strip_prefix('.') {
            Some(after) => split_digits(after),
            None => ("", after),
        };
        if whole.is_empty() && fraction.is_empty() {
            bail!("invalid duration '{}': expected a number", s);
        }

        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_end);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 60 * 60 * NANOS_PER_SEC,
            "" => bail!("invalid duration '{}': missing unit", s),
            other => bail!("invalid duration '{}': unknown unit '{}'", s, other),
        };

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| too_large())?
        };
        let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(too_large)?;

        if !fraction.is_empty() {
            // Digits past nanosecond precision of an hour cannot matter
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| too_large())?;
            let scale = 10u128.pow(digits.len() as u32);
            nanos += numerator * unit_nanos / scale;
        }

        total = total.checked_add(nanos).ok_or_else(too_large)?;
        rest = after;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| too_large())?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}
