//! Circuit breaker guarding the email service
//!
//! Three-state machine: `Closed` counts consecutive failures, `Open`
//! fails fast until the open-timeout elapses, `HalfOpen` admits a bounded
//! budget of probes and closes again after enough successes. Admission and
//! result recording are each a short critical section; the guarded call runs
//! outside any lock.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` before opening
    pub failure_threshold: u32,
    /// Successes in `HalfOpen` before closing
    pub success_threshold: u32,
    /// How long `Open` rejects before allowing a probe
    pub open_timeout: Duration,
    /// Probe budget for a single `HalfOpen` period
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
        }
    }
}

/// Point-in-time view of the breaker for metrics
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub half_open_in_flight: u32,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_at: Option<Instant>,
}

/// Outcome of a guarded call, as seen by the breaker
enum Outcome {
    Success,
    Failure,
    /// The downstream never observed the call; counters stay untouched.
    Cancelled,
}

/// Three-state circuit breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Run `op` under breaker protection.
    ///
    /// Admission is decided atomically, the operation runs outside the
    /// critical section, and the outcome is recorded atomically afterwards.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.admit()?;

        let result = op().await;
        match &result {
            Ok(_) => self.record(Outcome::Success),
            Err(Error::Cancelled) => self.record(Outcome::Cancelled),
            Err(_) => self.record(Outcome::Failure),
        }
        result
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// Force the breaker back to `Closed` with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Ok(()),

            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.open_timeout {
                    // The requesting task itself performs the transition and
                    // becomes the first probe.
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 1;
                    tracing::info!("circuit breaker entering half-open");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }

            BreakerState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_probes {
                    return Err(Error::TooManyProbes);
                }
                inner.half_open_in_flight += 1;
                Ok(())
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => match outcome {
                Outcome::Success => inner.consecutive_failures = 0,
                Outcome::Failure => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.last_failure_at = Some(Instant::now());
                        tracing::warn!(
                            failures = inner.consecutive_failures,
                            "circuit breaker opened"
                        );
                    }
                }
                Outcome::Cancelled => {}
            },

            BreakerState::HalfOpen => match outcome {
                Outcome::Success => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.success_threshold {
                        inner.state = BreakerState::Closed;
                        inner.consecutive_failures = 0;
                        inner.half_open_successes = 0;
                        inner.half_open_in_flight = 0;
                        tracing::info!("circuit breaker closed");
                    }
                }
                Outcome::Failure => {
                    // Re-entry requires waiting out another full timeout.
                    inner.state = BreakerState::Open;
                    inner.consecutive_failures = self.config.failure_threshold;
                    inner.half_open_in_flight = 0;
                    inner.last_failure_at = Some(Instant::now());
                    tracing::warn!("half-open probe failed, circuit breaker re-opened");
                }
                Outcome::Cancelled => {
                    // Return the probe slot so cancelled probes cannot pin
                    // the breaker at its cap.
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
            },

            // A call admitted earlier may finish after another one already
            // tripped the breaker; its outcome no longer matters.
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(100),
            half_open_max_probes: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .execute(|| async { Err::<(), _>(Error::Unavailable("down".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(test_config());

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(test_config());

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().consecutive_failures, 0);

        // Needs the full threshold again
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Fails fast without invoking the operation
        let result = breaker.execute(|| async { Ok::<(), Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // First probe transitions to half-open
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // Second success closes
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
        // Re-entry requires another full timeout
        assert_eq!(
            breaker.snapshot().consecutive_failures,
            test_config().failure_threshold
        );

        let result = breaker.execute(|| async { Ok::<(), Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_cap() {
        let breaker = Arc::new(CircuitBreaker::new(test_config()));

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Launch 4 concurrent probes against a slow downstream; the config
        // allows 2 in flight.
        let mut handles = Vec::new();
        for _ in 0..4 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<(), Error>(())
                    })
                    .await
            }));
        }

        let mut admitted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(Error::TooManyProbes) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(admitted, 2);
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn test_cancelled_call_leaves_counters_untouched() {
        let breaker = CircuitBreaker::new(test_config());

        fail(&breaker).await.unwrap_err();
        let before = breaker.snapshot();

        let result = breaker
            .execute(|| async { Err::<(), _>(Error::Cancelled) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));

        let after = breaker.snapshot();
        assert_eq!(after.consecutive_failures, before.consecutive_failures);
        assert_eq!(after.state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_returns_half_open_slot() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Probe gets cancelled; its slot must be returned.
        let result = breaker
            .execute(|| async { Err::<(), _>(Error::Cancelled) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.snapshot().half_open_in_flight, 0);

        // Budget is still fully available.
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_requires_recovery_traversal() {
        // Between two closed->open transitions there must be an
        // open->half_open->closed traversal.
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
