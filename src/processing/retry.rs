//! Retry logic and backoff policies
//!
//! This module contains the backoff descriptors attached to jobs and the pure
//! functions deciding whether and when a failed job runs again.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Backoff policy for failed jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Constant delay between attempts
    #[serde(rename_all = "camelCase")]
    Fixed {
        /// Delay between attempts in milliseconds
        base_delay_ms: u64,
    },
    /// Delay doubling after every failed attempt
    #[serde(rename_all = "camelCase")]
    Exponential {
        /// Delay before the first retry in milliseconds
        base_delay_ms: u64,
        /// Upper bound for a single delay
        #[serde(default)]
        max_delay_ms: Option<u64>,
        /// Add up to half of the computed delay as random jitter
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(DEFAULT_BASE_DELAY_MS)
    }
}

impl Backoff {
    /// Create a fixed backoff
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self::Fixed { base_delay_ms }
    }

    /// Create an exponential backoff without cap or jitter
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self::Exponential {
            base_delay_ms,
            max_delay_ms: None,
            jitter: false,
        }
    }

    /// Cap every computed delay (exponential only)
    pub fn with_max_delay(self, max_delay_ms: u64) -> Self {
        match self {
            Self::Exponential {
                base_delay_ms,
                jitter,
                ..
            } => Self::Exponential {
                base_delay_ms,
                max_delay_ms: Some(max_delay_ms),
                jitter,
            },
            fixed => fixed,
        }
    }

    /// Enable jitter (exponential only)
    pub fn with_jitter(self) -> Self {
        match self {
            Self::Exponential {
                base_delay_ms,
                max_delay_ms,
                ..
            } => Self::Exponential {
                base_delay_ms,
                max_delay_ms,
                jitter: true,
            },
            fixed => fixed,
        }
    }

    /// Base delay of the policy
    pub fn base_delay_ms(&self) -> u64 {
        match self {
            Self::Fixed { base_delay_ms } | Self::Exponential { base_delay_ms, .. } => {
                *base_delay_ms
            }
        }
    }

    /// Short name of the policy kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Exponential { .. } => "exponential",
        }
    }
}

/// Delay before the next attempt, given the attempts made so far.
///
/// `fixed` waits `base_delay_ms` every time. `exponential` waits
/// `base_delay_ms * 2^(attempts_made - 1)`: one base interval after the first
/// failure, two after the second, and so on.
///
/// Jitter adds a random amount below half of the computed delay, which keeps
/// consecutive delays non-decreasing: the smallest delay for attempt `n + 1`
/// is twice the unjittered delay for attempt `n`.
pub fn next_delay(attempts_made: u32, backoff: &Backoff) -> Duration {
    match backoff {
        Backoff::Fixed { base_delay_ms } => Duration::from_millis(*base_delay_ms),
        Backoff::Exponential {
            base_delay_ms,
            max_delay_ms,
            jitter,
        } => {
            let exponent = attempts_made.saturating_sub(1).min(63);
            let mut delay = base_delay_ms.saturating_mul(1u64 << exponent);

            if *jitter && delay > 1 {
                delay = delay.saturating_add(fastrand::u64(0..delay / 2));
            }

            if let Some(max_delay) = max_delay_ms {
                delay = delay.min(*max_delay);
            }

            Duration::from_millis(delay)
        }
    }
}

/// Whether a job that just failed its `attempts_made`-th attempt runs again.
pub fn should_retry(attempts_made: u32, max_attempts: u32) -> bool {
    attempts_made < max_attempts
}
