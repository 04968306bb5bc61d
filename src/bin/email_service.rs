//! MailFlow email service
//!
//! Accepts emails over gRPC, rate-limits dispatch through a token bucket,
//! and drains anything it could not send right away from a bounded retry
//! queue. A downtime simulator periodically takes the service into
//! maintenance mode.
//!
//! Environment variables (selected):
//! - `SERVER_GRPC_PORT`: gRPC port (default: 50052)
//! - `MONITOR_METRICS_PORT`: metrics port (default: 9102)
//! - `EMAIL_RATE_LIMIT_EMAILS_PER_MINUTE` (default: 60)
//! - `EMAIL_RATE_LIMIT_MAX_BURST` (default: 10)
//! - `EMAIL_MAINTENANCE_ENABLED` (default: true)
//! - `EMAIL_MAINTENANCE_FREQUENCY` (default: 5m)
//! - `EMAIL_MAINTENANCE_DOWNTIME_PERIOD` (default: 30s)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mailflow::config::{EmailServiceConfig, LogConfig, LogFormat};
use mailflow::limiter::TokenBucket;
use mailflow::maintenance::{AvailabilityFlag, DowntimeSimulator};
use mailflow::metrics::Metrics;
use mailflow::metrics_server::MetricsServer;
use mailflow::queue::RetryQueue;
use mailflow::sender::{EmailService, LogSender, SenderOptions};
use mailflow::shutdown;
use mailflow::store::EmailStore;
use mailflow::EmailGrpcService;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EmailServiceConfig::from_env()?;
    init_tracing(&config.log);

    info!(
        grpc_port = config.grpc_port,
        metrics_port = config.metrics_port,
        emails_per_minute = config.emails_per_minute,
        max_burst = config.max_burst,
        queue_capacity = config.retry_queue_capacity,
        "Starting MailFlow email service"
    );

    let metrics = Arc::new(Metrics::new("email_service")?);
    let store = Arc::new(EmailStore::new());
    let queue = Arc::new(RetryQueue::new(config.retry_queue_capacity));
    metrics.register_queue(Arc::clone(&queue))?;

    let limiter = Arc::new(TokenBucket::new(
        config.emails_per_minute,
        config.max_burst,
    ));
    let transport = Arc::new(LogSender::new("noreply@mailflow.dev"));
    let service = Arc::new(EmailService::new(
        store,
        transport,
        limiter,
        Arc::clone(&queue),
        Arc::clone(&metrics),
        SenderOptions {
            send_timeout: config.send_timeout,
            ..Default::default()
        },
    ));

    let (guard, shut) = shutdown::channel();
    tokio::spawn(async move {
        shutdown::wait_for_signal().await;
        guard.trigger();
    });

    let mut workers = Vec::new();
    workers.push(tokio::spawn(
        Arc::clone(&service).run_drain(shut.clone()),
    ));

    let availability = AvailabilityFlag::new();
    if config.maintenance_enabled {
        let simulator = DowntimeSimulator::new(
            availability.clone(),
            config.maintenance_frequency,
            config.maintenance_downtime,
            Arc::clone(&metrics),
        );
        workers.push(tokio::spawn(simulator.run(shut.clone())));
    }

    workers.push(MetricsServer::start(
        config.metrics_port,
        Arc::clone(&metrics),
        shut.clone(),
    ));

    let grpc = EmailGrpcService::new(
        Arc::clone(&service),
        availability,
        Arc::clone(&metrics),
        shut.clone(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    info!(%addr, "gRPC server listening");

    let serve_shutdown = shut.clone();
    Server::builder()
        .add_service(grpc.into_server())
        .serve_with_shutdown(addr, async move { serve_shutdown.cancelled().await })
        .await?;

    let join_all = async {
        for worker in workers {
            let _ = worker.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
        warn!("workers did not stop within the shutdown grace window");
    }

    info!("MailFlow email service shutdown complete");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));

    match log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}
