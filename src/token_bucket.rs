//! # Token Bucket Algorithm Implementation
//!
//! This module implements the [token bucket algorithm](https://en.wikipedia.org/wiki/Token_bucket)
//! for rate limiting. The bucket is entirely passive: it contains no timer,
//! no task, and no I/O. Concurrency is pushed to the caller
//! ([`crate::rate_limiter::RateLimiterRegistry`] / [`crate::throttling_queue::ThrottlingQueue`]),
//! which keeps this primitive trivially testable.
//!
//! ## How It Works
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         TOKEN BUCKET VISUALIZATION                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                             │
//! │   Bucket State Over Time (capacity=10, refill_rate=2/sec):                  │
//! │                                                                             │
//! │   Time 0s:  [██████████] 10/10 tokens (full)                                │
//! │             ↓ try_acquire(1) succeeds, 9 remaining                          │
//! │   Time 0s:  [█████████ ] 9/10 tokens                                        │
//! │             ↓ 3 more acquisitions of 1                                      │
//! │   Time 0s:  [██████    ] 6/10 tokens                                        │
//! │             ↓ 0.5s pass (refill = 0.5 × 2 = 1 token)                        │
//! │   Time 0.5s: [███████  ] 7/10 tokens                                        │
//! │             ↓ try_acquire(10) fails, bucket untouched                       │
//! │   Time 0.5s: [███████  ] 7/10 tokens (unchanged)                           │
//! │                                                                             │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Edge Case Handling
//!
//! - **Overflow prevention**: elapsed time is capped at 1 hour when computing refill.
//! - **NaN/Infinity protection**: refill additions are checked for finiteness.
//! - **Clock skew**: a backward clock jump is a no-op refill, never a panic.
//! - **Precision**: `tokens` is `f64` internally; callers observe `floor` when comparing.

use crate::error::SurgeError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single-endpoint token bucket with lazy, time-based refill.
///
/// # Invariant
///
/// After any operation, `0.0 <= tokens <= capacity as f64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold (the burst size).
    pub capacity: u64,
    /// Current token count (fractional, for precise refill).
    pub tokens: f64,
    /// Tokens added per second (the sustained rate).
    pub refill_rate: f64,
    /// Timestamp of the last refill calculation (ms since UNIX epoch).
    pub last_refill: u64,
}

impl TokenBucket {
    /// Creates a new bucket, starting at full capacity.
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: Self::now_ms(),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Lazily refills tokens based on elapsed wall-clock time.
    ///
    /// A clock that appears to move backward (`now < last_refill`, which
    /// `saturating_sub` turns into zero elapsed time) is treated as a no-op:
    /// no tokens are added, but `last_refill` is not rewound either.
    pub fn refill(&mut self) {
        let now = Self::now_ms();
        let elapsed_ms = now.saturating_sub(self.last_refill);

        // Cap elapsed time to prevent overflow/runaway refill after long idle
        // periods or a stale bucket (1 hour max).
        let safe_elapsed_ms = elapsed_ms.min(3_600_000);
        let seconds_elapsed = safe_elapsed_ms as f64 / 1000.0;

        if seconds_elapsed > 0.0 {
            let tokens_to_add = self.refill_rate * seconds_elapsed;
            if tokens_to_add.is_finite() && tokens_to_add > 0.0 {
                self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
            }
            self.last_refill = now;
        }
    }

    /// Attempts to acquire `n` tokens without blocking.
    ///
    /// Refills first, then either subtracts `n` and returns `true`, or
    /// leaves the bucket untouched and returns `false`.
    pub fn try_acquire(&mut self, n: u64) -> Result<bool, SurgeError> {
        if n == 0 {
            return Err(SurgeError::single_validation(
                "tokens",
                "token count must be greater than zero",
            ));
        }

        self.refill();

        let requested = n as f64;
        if self.tokens >= requested {
            self.tokens -= requested;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Duration until `n` tokens will be available, assuming no other
    /// acquisitions happen in the meantime.
    ///
    /// Returns `Duration::ZERO` if `n` tokens are already available after a
    /// refill. Otherwise the wait is rounded up to whole milliseconds and is
    /// never reported as less than 1ms when positive.
    pub fn wait_time(&mut self, n: u64) -> Duration {
        self.refill();

        let requested = n as f64;
        if self.tokens >= requested {
            return Duration::ZERO;
        }

        if self.refill_rate <= 0.0 {
            return Duration::from_secs(u64::MAX / 1000);
        }

        let deficit = requested - self.tokens;
        let seconds_needed = deficit / self.refill_rate;
        let ms_needed = (seconds_needed * 1000.0).ceil().max(1.0);
        Duration::from_millis(ms_needed as u64)
    }

    /// Resets the bucket to full capacity.
    pub fn reset(&mut self) {
        self.tokens = self.capacity as f64;
        self.last_refill = Self::now_ms();
    }

    /// Rebuilds this bucket with a new capacity/refill rate, preserving the
    /// fill *ratio* rather than the absolute token count — reconfiguring a
    /// near-empty small bucket to a much larger capacity should not hand out
    /// a full refill for free.
    pub fn reconfigure(&mut self, capacity: u64, refill_rate: f64) {
        let ratio = if self.capacity == 0 {
            0.0
        } else {
            self.tokens / self.capacity as f64
        };
        self.capacity = capacity;
        self.refill_rate = refill_rate;
        self.tokens = (capacity as f64 * ratio).floor();
    }

    /// Whole tokens currently available (triggers a refill; does not consume).
    pub fn available_tokens(&mut self) -> u64 {
        self.refill();
        self.tokens.floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bucket_has_full_capacity() {
        let bucket = TokenBucket::new(100, 10.0);
        assert_eq!(bucket.capacity, 100);
        assert_eq!(bucket.tokens, 100.0);
    }

    #[test]
    fn try_acquire_consumes_tokens() {
        let mut bucket = TokenBucket::new(100, 10.0);
        assert!(bucket.try_acquire(50).unwrap());
        assert_eq!(bucket.tokens, 50.0);
    }

    #[test]
    fn try_acquire_rejects_when_insufficient() {
        let mut bucket = TokenBucket::new(10, 1.0);
        assert!(!bucket.try_acquire(20).unwrap());
        assert_eq!(bucket.tokens, 10.0);
    }

    #[test]
    fn try_acquire_rejects_zero() {
        let mut bucket = TokenBucket::new(10, 1.0);
        assert!(bucket.try_acquire(0).is_err());
    }

    #[test]
    fn invariant_tokens_never_exceed_capacity() {
        let mut bucket = TokenBucket::new(10, 1.0);
        bucket.last_refill = 0; // pretend a long time has passed
        bucket.refill();
        assert!(bucket.tokens <= bucket.capacity as f64);
        assert!(bucket.tokens >= 0.0);
    }

    #[test]
    fn reset_then_full_acquire_succeeds() {
        let mut bucket = TokenBucket::new(100, 10.0);
        bucket.tokens = 10.0;
        bucket.reset();
        assert_eq!(bucket.tokens, 100.0);
        assert!(bucket.try_acquire(100).unwrap());
    }

    #[test]
    fn wait_time_is_zero_when_available() {
        let mut bucket = TokenBucket::new(10, 2.0);
        assert_eq!(bucket.wait_time(5), Duration::ZERO);
    }

    #[test]
    fn wait_time_scales_with_deficit() {
        let mut bucket = TokenBucket::new(10, 2.0);
        bucket.tokens = 0.0;
        let wait = bucket.wait_time(4);
        // 4 tokens at 2/sec = 2 seconds
        assert!(wait >= Duration::from_millis(1999));
        assert!(wait <= Duration::from_millis(2100));
    }

    #[test]
    fn reconfigure_preserves_fill_ratio() {
        let mut bucket = TokenBucket::new(10, 1.0);
        bucket.tokens = 5.0; // half full
        bucket.reconfigure(100, 10.0);
        assert_eq!(bucket.capacity, 100);
        assert_eq!(bucket.tokens, 50.0);
    }

    #[test]
    fn backward_clock_jump_is_a_no_op() {
        let mut bucket = TokenBucket::new(10, 5.0);
        bucket.tokens = 3.0;
        bucket.last_refill = u64::MAX; // "in the future" relative to now
        bucket.refill();
        assert_eq!(bucket.tokens, 3.0);
    }

    #[test]
    fn serialization_round_trips() {
        let bucket = TokenBucket::new(100, 10.0);
        let json = serde_json::to_string(&bucket).unwrap();
        let deserialized: TokenBucket = serde_json::from_str(&json).unwrap();
        assert_eq!(bucket.capacity, deserialized.capacity);
        assert_eq!(bucket.refill_rate, deserialized.refill_rate);
    }
}
