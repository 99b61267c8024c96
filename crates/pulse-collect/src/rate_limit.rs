//! Token-bucket rate limiter for ingestion admission control
//!
//! Capacity equals the per-second rate; tokens refill continuously based
//! on elapsed wall-clock time and never exceed capacity. One limiter
//! instance is shared across all ingestion paths.

use pulse_core::error::{TelemetryError, TelemetryResult};
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_second: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_second` items per second
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            rate_per_second,
            capacity: rate_per_second,
            bucket: Mutex::new(Bucket {
                tokens: rate_per_second,
                last_refill: Instant::now(),
            }),
        }
    }

    /// The configured rate
    pub fn rate(&self) -> f64 {
        self.rate_per_second
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Admit a single item, consuming one token
    pub async fn check(&self) -> TelemetryResult<()> {
        self.check_batch(1).await
    }

    /// Admit `n` items atomically: either all tokens are consumed or none
    pub async fn check_batch(&self, n: usize) -> TelemetryResult<()> {
        let needed = n as f64;
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            Ok(())
        } else {
            // Current demand expressed as the rate that would drain what
            // remains plus the shortfall
            let current = self.rate_per_second + (needed - bucket.tokens);
            Err(TelemetryError::RateLimit {
                limit: self.rate_per_second,
                current,
            })
        }
    }

    /// Tokens currently available (refilled first); for tests and stats
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}
