//! Token bucket rate limiter
//!
//! Governs admission on the sender side. Continuous refill: each `wait`
//! tops the bucket up from the elapsed time, then either takes a token or
//! sleeps until the deficit is covered. The critical section covers only
//! the refill computation and the decrement; sleeping happens outside it,
//! so a cancelled waiter never consumes a token.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

/// How a token was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was available immediately
    Immediate,
    /// The caller had to sleep for a refill
    Delayed,
}

/// Admission control over a shared token budget
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Block until one token is available or shutdown fires.
    async fn wait(&self, shutdown: &Shutdown) -> Result<Admission>;
}

/// Token bucket with continuous refill
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// Tokens added per minute
    refill_per_minute: f64,
    /// Maximum bucket capacity
    burst: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket holding `burst` tokens that refills at
    /// `refill_per_minute`. The bucket starts full.
    pub fn new(refill_per_minute: u32, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            refill_per_minute: refill_per_minute as f64,
            burst: burst as f64,
        }
    }

    /// Take a token if one is available right now, otherwise report how long
    /// until the deficit is covered.
    fn try_take(&self) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_minute / 60.0).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_per_minute <= 0.0 {
            // No refill configured; callers can only wait for shutdown.
            return Err(Duration::MAX);
        }

        let deficit = 1.0 - state.tokens;
        Err(Duration::from_secs_f64(deficit * 60.0 / self.refill_per_minute))
    }
}

#[async_trait]
impl RateLimit for TokenBucket {
    async fn wait(&self, shutdown: &Shutdown) -> Result<Admission> {
        let mut slept = false;
        loop {
            let delay = match self.try_take() {
                Ok(()) => {
                    return Ok(if slept {
                        Admission::Delayed
                    } else {
                        Admission::Immediate
                    })
                }
                Err(delay) => delay,
            };

            slept = true;
            if delay == Duration::MAX {
                shutdown.cancelled().await;
                return Err(Error::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_burst_is_available_immediately() {
        let (_guard, shut) = shutdown::channel();
        let bucket = TokenBucket::new(60, 3);

        for _ in 0..3 {
            assert_eq!(bucket.wait(&shut).await.unwrap(), Admission::Immediate);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_refill() {
        let (_guard, shut) = shutdown::channel();
        let bucket = TokenBucket::new(60, 1); // 1 token/s after the burst

        assert_eq!(bucket.wait(&shut).await.unwrap(), Admission::Immediate);

        let start = Instant::now();
        assert_eq!(bucket.wait(&shut).await.unwrap(), Admission::Delayed);
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(900),
            "expected ~1s wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_bounded_by_burst_plus_refill() {
        let (_guard, shut) = shutdown::channel();
        let bucket = Arc::new(TokenBucket::new(60, 2));

        // Over 3 seconds: at most burst (2) + 3 refills.
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut admitted = 0;
        loop {
            tokio::select! {
                res = bucket.wait(&shut) => {
                    res.unwrap();
                    admitted += 1;
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        assert!(admitted <= 5, "admitted {admitted}, expected <= burst + rate * 3s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_consume_token() {
        let (guard, shut) = shutdown::channel();
        let bucket = Arc::new(TokenBucket::new(60, 1));

        // Drain the burst.
        bucket.wait(&shut).await.unwrap();

        let waiter = tokio::spawn({
            let bucket = Arc::clone(&bucket);
            let shut = shut.clone();
            async move { bucket.wait(&shut).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.trigger();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));

        // The bucket level is unchanged by the cancelled waiter: after a full
        // refill interval exactly one token is available.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_waits_for_shutdown() {
        let (guard, shut) = shutdown::channel();
        let bucket = Arc::new(TokenBucket::new(0, 1));

        bucket.wait(&shut).await.unwrap();

        let waiter = tokio::spawn({
            let bucket = Arc::clone(&bucket);
            let shut = shut.clone();
            async move { bucket.wait(&shut).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.trigger();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    }
}
