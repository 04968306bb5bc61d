//! Exponential backoff retrier
//!
//! Re-runs a fallible async operation with exponentially growing, jittered
//! delays. Errors that declare themselves non-retryable exit the loop
//! immediately; a shutdown during the sleep returns `Error::Cancelled`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

/// Backoff schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Total attempts, including the first call
    pub max_attempts: u32,
    /// Add uniform(0, 0.3 * delay) to spread out synchronized retries
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based: the delay taken after
    /// the first failed call is `delay(1)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exp = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter {
            capped + rand::thread_rng().gen_range(0.0..0.3) * capped
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Runs operations under a [`Backoff`] schedule
#[derive(Debug, Clone)]
pub struct Retrier {
    backoff: Backoff,
}

impl Retrier {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    /// Invoke `op` until it succeeds, a non-retryable error occurs, the
    /// attempt budget is exhausted, or shutdown interrupts a backoff sleep.
    /// The operation runs exactly once when the first call succeeds.
    pub async fn run<F, Fut, T>(&self, shutdown: &Shutdown, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.backoff.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::debug!(attempt, error = %err, "attempt failed, backing off");
                    last_err = Some(err);
                }
            }

            if attempt < self.backoff.max_attempts {
                let delay = self.backoff.delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal("retry budget was zero".to_string())))
    }
}
