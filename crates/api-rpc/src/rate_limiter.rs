//! Rate Limiter (Token Bucket Algorithm)
//!
//! Caps the request rate on the mutating RPC methods.

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter using a token bucket
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    max_tokens: f64,
    refill_per_sec: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_tokens` - Maximum burst size
    /// * `refill_per_sec` - Tokens added per second
    ///
    /// # Example
    /// Allow 100 requests/sec with burst of 200:
    /// `RateLimiter::new(200, 100)`
    pub fn new(max_tokens: u32, refill_per_sec: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens as f64,
                last_refill: Instant::now(),
            }),
            max_tokens: max_tokens as f64,
            refill_per_sec: refill_per_sec as f64,
        }
    }

    /// Check if request is allowed (consumes 1 token)
    ///
    /// Returns true if allowed, false if rate limited
    pub async fn check(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Get remaining tokens (for monitoring)
    pub async fn remaining(&self) -> f64 {
        self.bucket.lock().await.tokens
    }
}
