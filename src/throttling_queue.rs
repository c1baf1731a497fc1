//! # Throttling Queue
//!
//! Pairs a [`TokenBucket`] with a FIFO admission queue for a single
//! endpoint. Callers never receive a synthesized rejection from the
//! server under test — they receive either a (possibly zero) delay or a
//! well-typed [`LimiterError`], which keeps generated load reflective of
//! the service being tested rather than the client's own saturation
//! policy.
//!
//! There is no dedicated background "pump" task: a suspended [`submit`](ThrottlingQueue::submit)
//! call *is* the per-endpoint wake scheduler described in the concurrency
//! model — each waiter polls its own turn, sleeping for the bucket's
//! reported `wait_time` between attempts, and only the waiter at the head
//! of the FIFO queue is permitted to acquire. This keeps the suspension
//! point trivially cancellable: dropping the future removes the waiter
//! without disturbing anyone behind it.

use crate::error::{LimiterError, SurgeError};
use crate::token_bucket::TokenBucket;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Point-in-time statistics for a single endpoint's queue.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub successful_acquisitions: u64,
    pub failed_acquisitions: u64,
    total_wait_ms: u64,
}

impl QueueStats {
    pub fn average_wait_ms(&self) -> f64 {
        if self.successful_acquisitions == 0 {
            0.0
        } else {
            self.total_wait_ms as f64 / self.successful_acquisitions as f64
        }
    }
}

struct Inner {
    bucket: Mutex<TokenBucket>,
    /// FIFO order of pending tickets. Only the front ticket may attempt
    /// `try_acquire`; everyone else keeps sleeping.
    waiters: Mutex<VecDeque<u64>>,
    next_ticket: AtomicU64,
    /// Bumped by `clear()`; a waiter whose captured generation no longer
    /// matches the current one has been cleared out from under it.
    generation: AtomicU64,
    notify: Notify,
    max_queue_size: usize,
    max_wait: Duration,
    backpressure: bool,
    stats: Mutex<QueueStats>,
}

/// A FIFO pacing queue in front of a single endpoint's [`TokenBucket`].
#[derive(Clone)]
pub struct ThrottlingQueue {
    inner: std::sync::Arc<Inner>,
}

impl ThrottlingQueue {
    pub fn new(bucket: TokenBucket, max_queue_size: usize, max_wait: Duration) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                bucket: Mutex::new(bucket),
                waiters: Mutex::new(VecDeque::new()),
                next_ticket: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                notify: Notify::new(),
                max_queue_size,
                max_wait,
                backpressure: true,
                stats: Mutex::new(QueueStats::default()),
            }),
        }
    }

    /// Suspends until `tokens` are granted from the underlying bucket.
    ///
    /// Returns the actual wait duration on success. Fails with
    /// [`LimiterError::QueueOverflow`] if the queue is already at capacity,
    /// with [`LimiterError::WaitTimeout`] if the wait would exceed
    /// `maxWaitTime`, or with [`LimiterError::Cleared`] if [`Self::clear`]
    /// runs while this call is suspended.
    pub async fn submit(&self, tokens: u64) -> Result<Duration, SurgeError> {
        let started = Instant::now();

        if self.try_fast_path(tokens)? {
            self.record_success(Duration::ZERO);
            return Ok(Duration::ZERO);
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        let generation = self.inner.generation.load(Ordering::SeqCst);
        {
            let mut waiters = self.inner.waiters.lock().unwrap();
            if self.inner.backpressure && waiters.len() >= self.inner.max_queue_size {
                self.record_failure();
                return Err(SurgeError::Limiter(LimiterError::QueueOverflow));
            }
            waiters.push_back(ticket);
        }

        let outcome = self.wait_for_turn(ticket, generation, tokens, started).await;
        self.remove_waiter(ticket);

        match outcome {
            Ok(()) => {
                let waited = started.elapsed();
                self.record_success(waited);
                Ok(waited)
            }
            Err(e) => {
                self.record_failure();
                Err(SurgeError::Limiter(e))
            }
        }
    }

    fn try_fast_path(&self, tokens: u64) -> Result<bool, SurgeError> {
        let mut bucket = self.inner.bucket.lock().unwrap();
        bucket.try_acquire(tokens)
    }

    async fn wait_for_turn(
        &self,
        ticket: u64,
        generation: u64,
        tokens: u64,
        started: Instant,
    ) -> Result<(), LimiterError> {
        loop {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return Err(LimiterError::Cleared);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.inner.max_wait {
                return Err(LimiterError::WaitTimeout);
            }

            let is_head = {
                let waiters = self.inner.waiters.lock().unwrap();
                waiters.front() == Some(&ticket)
            };

            if is_head {
                let mut bucket = self.inner.bucket.lock().unwrap();
                match bucket.try_acquire(tokens) {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(_) => return Ok(()), // n==0 never reaches here; unreachable in practice
                }
            }

            let sleep_for = {
                let mut bucket = self.inner.bucket.lock().unwrap();
                bucket.wait_time(tokens)
            }
            .max(Duration::from_millis(1))
            .min(self.inner.max_wait.saturating_sub(elapsed).max(Duration::from_millis(1)));

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.inner.notify.notified() => {}
            }
        }
    }

    fn remove_waiter(&self, ticket: u64) {
        let mut waiters = self.inner.waiters.lock().unwrap();
        waiters.retain(|t| *t != ticket);
    }

    fn record_success(&self, waited: Duration) {
        let mut stats = self.inner.stats.lock().unwrap();
        stats.successful_acquisitions += 1;
        stats.total_wait_ms += waited.as_millis() as u64;
    }

    fn record_failure(&self) {
        let mut stats = self.inner.stats.lock().unwrap();
        stats.failed_acquisitions += 1;
    }

    /// Fails every pending waiter with [`LimiterError::Cleared`] and resets
    /// queue membership. Does not reset acquisition statistics.
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.waiters.lock().unwrap().clear();
        self.inner.notify.notify_waiters();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.waiters.lock().unwrap().len()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats.lock().unwrap().clone()
    }

    pub fn bucket_snapshot(&self) -> TokenBucket {
        self.inner.bucket.lock().unwrap().clone()
    }

    pub fn with_bucket<T>(&self, f: impl FnOnce(&mut TokenBucket) -> T) -> T {
        let mut bucket = self.inner.bucket.lock().unwrap();
        f(&mut bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_path_returns_zero_wait() {
        let queue = ThrottlingQueue::new(TokenBucket::new(10, 10.0), 100, Duration::from_secs(5));
        let waited = queue.submit(1).await.unwrap();
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn queue_overflow_when_full() {
        let queue = ThrottlingQueue::new(TokenBucket::new(1, 0.001), 0, Duration::from_secs(5));
        // Drain the single token so the next submit must enqueue.
        queue.submit(1).await.unwrap();
        let result = queue.submit(1).await;
        assert!(matches!(
            result,
            Err(SurgeError::Limiter(LimiterError::QueueOverflow))
        ));
    }

    #[tokio::test]
    async fn wait_timeout_when_refill_too_slow() {
        let queue = ThrottlingQueue::new(
            TokenBucket::new(1, 0.001),
            100,
            Duration::from_millis(50),
        );
        queue.submit(1).await.unwrap();
        let result = queue.submit(1).await;
        assert!(matches!(
            result,
            Err(SurgeError::Limiter(LimiterError::WaitTimeout))
        ));
    }

    #[tokio::test]
    async fn clear_fails_pending_waiters() {
        let queue = ThrottlingQueue::new(TokenBucket::new(1, 0.001), 100, Duration::from_secs(30));
        queue.submit(1).await.unwrap();

        let queue2 = queue.clone();
        let pending = tokio::spawn(async move { queue2.submit(1).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.clear();

        let result = pending.await.unwrap();
        assert!(matches!(
            result,
            Err(SurgeError::Limiter(LimiterError::Cleared))
        ));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = ThrottlingQueue::new(TokenBucket::new(1, 1.0), 100, Duration::from_secs(10));
        queue.submit(1).await.unwrap(); // drains the bucket

        let order = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue.submit(1).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
