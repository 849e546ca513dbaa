//! Retry backoff strategies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// How long a failed job waits before it becomes eligible again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// Wait `attempt` seconds.
    Linear,
    /// Wait `2^attempt` seconds, capped at one hour.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::None => "none",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }

    /// Delay before the next attempt after `attempt` attempts have been made.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(*self, attempt)
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackoffStrategy::None),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy '{}'", other)),
        }
    }
}

/// Compute the backoff for a strategy and attempt number.
///
/// Pure and deterministic: `none` is always zero, `linear` is `attempt`
/// seconds and `exponential` is `min(2^attempt, 3600)` seconds.
pub fn calculate_backoff(strategy: BackoffStrategy, attempt: u32) -> Duration {
    match strategy {
        BackoffStrategy::None => Duration::ZERO,
        BackoffStrategy::Linear => Duration::from_secs(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            let secs = 1u64
                .checked_shl(attempt)
                .unwrap_or(u64::MAX)
                .min(MAX_BACKOFF.as_secs());
            Duration::from_secs(secs)
        }
    }
}
