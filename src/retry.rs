//! Backoff for retryable sync failures.
//!
//! Capped exponential: the delay doubles per attempt from `base_delay_ms` up
//! to `max_delay_ms`, plus a small jitter derived from the entry id so
//! entries that failed together do not all come back in the same instant.
//! After `max_attempts` automatic attempts an entry stays `FAILED` until
//! someone calls `retry_failed`.

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};

pub const DEFAULT_RETRY_DELAY_MS: i64 = 5_000;
pub const MAX_RETRY_DELAY_MS: i64 = 300_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn deterministic_jitter_ms(seed: &str) -> i64 {
    let folded = seed
        .bytes()
        .fold(0i64, |acc, b| acc.wrapping_mul(31).wrapping_add(i64::from(b)));
    (folded.rem_euclid(700)) + 50
}

impl RetryPolicy {
    /// Delay before the next attempt once `attempts` attempts have failed.
    pub fn delay_ms(&self, attempts: u32) -> i64 {
        let exp = attempts.max(1).saturating_sub(1);
        let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);
        self.base_delay_ms
            .max(1)
            .saturating_mul(pow2)
            .min(self.max_delay_ms)
    }

    /// When an entry with `attempts` failures becomes eligible again.
    pub fn next_retry_at(&self, attempts: u32, seed: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_ms(attempts) + deterministic_jitter_ms(seed);
        (now + ChronoDuration::milliseconds(delay)).trunc_subsecs(6)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
