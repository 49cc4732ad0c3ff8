use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    UnixTimeMs, BASE_RETRY_DELAY_MS, JITTER_MAX_MS, MAX_RETRY_ATTEMPTS, MAX_RETRY_DELAY_MS,
    MAX_USER_RETRY_ATTEMPTS,
};

/// Bounds on how often, and how soon, something may be tried again.
///
/// User-driven retries (classification, geolocation) only consult
/// `max_attempts`; queue redelivery also waits out the backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            base_delay_ms: BASE_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn user_initiated() -> Self {
        Self {
            max_attempts: MAX_USER_RETRY_ATTEMPTS,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_made`.
    #[must_use]
    pub const fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Backoff before attempt number `attempt + 1`: base * 2^attempt,
    /// capped, plus jitter.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32, jitter_ms: u64) -> u64 {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        exponential
            .min(self.max_delay_ms)
            .saturating_add(jitter_ms.min(self.jitter_max_ms))
    }

    #[must_use]
    pub fn next_retry_at(&self, now: UnixTimeMs, attempt: u32) -> UnixTimeMs {
        now.add_millis(self.delay_ms(attempt, generate_jitter(self.jitter_max_ms)))
    }
}

#[must_use]
pub fn generate_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max_ms)
}
