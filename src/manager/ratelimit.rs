// ABOUTME: Token-bucket rate limiter pacing outbound sends per adapter.
// ABOUTME: Burst capacity is half the refill rate, at least one token.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by an adapter's text and media workers.
///
/// Refills continuously at `rate` tokens per second up to a burst of
/// `max(1, ceil(rate / 2))`. Uses the tokio clock so tests can drive it with
/// virtual time.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate: f64) -> Self {
        let rate = if rate > 0.0 { rate } else { 1.0 };
        let burst = (rate / 2.0).ceil().max(1.0);
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Take one token without waiting. Used by tests and diagnostics.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait for one token. Returns `false` when `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait = match self.take() {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Refill for elapsed time, then either consume a token or report how
    /// long until one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }
}
