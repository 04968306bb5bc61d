//! Scheduled downtime simulation
//!
//! Toggles a shared availability flag: up for `frequency`, down for
//! `downtime`, until shutdown. The admission layer reads the flag with a
//! single atomic load and rejects with `unavailable` while it is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::metrics::Metrics;
use crate::shutdown::Shutdown;

/// Shared availability flag, readable without locking
#[derive(Clone, Default)]
pub struct AvailabilityFlag(Arc<AtomicBool>);

impl AvailabilityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single atomic load on the admission path.
    pub fn is_down(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_down(&self, down: bool) {
        self.0.store(down, Ordering::Relaxed);
    }
}

/// Background worker that simulates periodic maintenance windows
pub struct DowntimeSimulator {
    flag: AvailabilityFlag,
    frequency: Duration,
    downtime: Duration,
    metrics: Arc<Metrics>,
}

impl DowntimeSimulator {
    pub fn new(
        flag: AvailabilityFlag,
        frequency: Duration,
        downtime: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            flag,
            frequency,
            downtime,
            metrics,
        }
    }

    /// Run until shutdown. The flag is always cleared on exit so a shutdown
    /// mid-outage does not leave the service marked down.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            frequency = ?self.frequency,
            downtime = ?self.downtime,
            "downtime simulator started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.frequency) => {}
                _ = shutdown.cancelled() => break,
            }

            info!(duration = ?self.downtime, "service going down for maintenance");
            self.flag.set_down(true);
            self.metrics.downtime_periods.inc();

            tokio::select! {
                _ = tokio::time::sleep(self.downtime) => {}
                _ = shutdown.cancelled() => break,
            }

            self.flag.set_down(false);
            info!("service back up");
        }

        self.flag.set_down(false);
        info!("downtime simulator stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shutdown;

    #[test]
    fn test_flag_defaults_to_up() {
        let flag = AvailabilityFlag::new();
        assert!(!flag.is_down());
        flag.set_down(true);
        assert!(flag.is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_toggles_flag_on_schedule() {
        let (guard, shut) = shutdown::channel();
        let flag = AvailabilityFlag::new();
        let metrics = Arc::new(Metrics::new("test_maintenance_toggle").unwrap());

        let simulator = DowntimeSimulator::new(
            flag.clone(),
            Duration::from_secs(10),
            Duration::from_secs(2),
            Arc::clone(&metrics),
        );
        let handle = tokio::spawn(simulator.run(shut));

        // Still up during the first up-window.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!flag.is_down());

        // Inside the first downtime window.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(flag.is_down());

        // Back up afterwards.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!flag.is_down());
        assert_eq!(metrics.downtime_periods.get(), 1);

        guard.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_outage_clears_flag() {
        let (guard, shut) = shutdown::channel();
        let flag = AvailabilityFlag::new();
        let metrics = Arc::new(Metrics::new("test_maintenance_clear").unwrap());

        let simulator = DowntimeSimulator::new(
            flag.clone(),
            Duration::from_secs(1),
            Duration::from_secs(60),
            Arc::clone(&metrics),
        );
        let handle = tokio::spawn(simulator.run(shut));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(flag.is_down());

        guard.trigger();
        handle.await.unwrap();
        assert!(!flag.is_down());
    }
}
