//! Cooperative shutdown propagation
//!
//! Every long-lived worker holds a [`Shutdown`] handle and selects on
//! [`Shutdown::cancelled`] next to its real work. The binaries trigger the
//! paired [`ShutdownGuard`] on SIGINT/SIGTERM and then join workers within
//! the grace window.

use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Create a linked guard/handle pair.
pub fn channel() -> (ShutdownGuard, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownGuard { tx }, Shutdown { rx })
}

/// Owning side of the shutdown signal
pub struct ShutdownGuard {
    tx: watch::Sender<bool>,
}

impl ShutdownGuard {
    /// Signal all subscribed workers to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Create another handle observing this guard.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing side of the shutdown signal
///
/// Cloneable; all clones observe the same guard. A dropped guard counts as
/// a shutdown so orphaned workers cannot hang.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Guard dropped without an explicit trigger; treat as shutdown.
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
            // Fall through - we'll rely on SIGTERM or other shutdown
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (guard, shutdown) = channel();

        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
            }
        });

        assert!(!shutdown.is_cancelled());
        guard.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_after_trigger() {
        let (guard, shutdown) = channel();
        guard.trigger();
        // Must not hang
        tokio::time::timeout(Duration::from_millis(100), shutdown.cancelled())
            .await
            .expect("already-cancelled handle resolves immediately");
    }

    #[tokio::test]
    async fn test_dropped_guard_counts_as_shutdown() {
        let (guard, shutdown) = channel();
        drop(guard);
        tokio::time::timeout(Duration::from_millis(100), shutdown.cancelled())
            .await
            .expect("dropped guard resolves waiters");
    }
}
