//! Token bucket rate limiter
//!
//! One token is one byte. The bucket starts full, so the first `capacity`
//! bytes go out immediately; after that tokens accrue at `rate` per second.
//! A request larger than the tokens on hand puts the bucket into debt and the
//! caller sleeps until the debt is repaid, which keeps the long-run rate at
//! exactly `rate` bytes per second.

use std::time::Duration;
use tokio::time::Instant;

/// Byte-granular token bucket driven by the tokio clock
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// `capacity` and `rate` are clamped to at least one token so the bucket
    /// can always make progress.
    pub fn new(capacity: u64, rate: u64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            rate: rate.max(1) as f64,
            available: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Bucket holding one second's worth of tokens at `rate`
    pub fn with_rate(rate: u64) -> Self {
        Self::new(rate, rate)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Refill rate in tokens per second
    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// Tokens on hand at `now`; negative while in debt.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.available
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.available = (self.available + elapsed.as_secs_f64() * self.rate).min(self.capacity);
    }

    /// Take `count` tokens at `now` and return how long the caller must wait
    /// before using them.
    pub fn take(&mut self, now: Instant, count: u64) -> Duration {
        self.refill(now);
        self.available -= count as f64;
        if self.available >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.available / self.rate)
        }
    }

    /// Take `count` tokens, sleeping until they are paid for. Returns the time
    /// spent waiting.
    pub async fn acquire(&mut self, count: u64) -> Duration {
        let wait = self.take(Instant::now(), count);
        if !wait.is_zero() {
            tracing::trace!(tokens = count, wait_ms = wait.as_millis() as u64, "Throttling");
            tokio::time::sleep(wait).await;
        }
        wait
    }
}
