//! MailFlow user service
//!
//! Persists users over gRPC and an HTTP mirror, firing a welcome email for
//! each new user through the resilient email client (circuit breaker,
//! retrier, producer-side retry queue).
//!
//! Environment variables (selected):
//! - `SERVER_GRPC_PORT`: gRPC port (default: 50051)
//! - `SERVER_HTTP_PORT`: HTTP mirror port (default: 8080)
//! - `MONITOR_METRICS_PORT`: metrics port (default: 9101)
//! - `CLIENT_EMAIL_SERVICE_ADDRESS` (default: http://localhost:50052)
//! - `CLIENT_EMAIL_SERVICE_TIMEOUT` (default: 5s)
//! - `CLIENT_EMAIL_SERVICE_RETRY_ATTEMPTS` (default: 5)
//! - `CLIENT_EMAIL_SERVICE_RETRY_DELAY` (default: 100ms)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mailflow::client::{GrpcDispatch, ResilientEmailClient};
use mailflow::config::{LogConfig, LogFormat, UserServiceConfig};
use mailflow::http::{self, HttpState};
use mailflow::metrics::Metrics;
use mailflow::metrics_server::MetricsServer;
use mailflow::shutdown;
use mailflow::store::UserStore;
use mailflow::user::UserService;
use mailflow::UserGrpcService;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = UserServiceConfig::from_env()?;
    init_tracing(&config.log);

    info!(
        grpc_port = config.grpc_port,
        http_port = config.http_port,
        metrics_port = config.metrics_port,
        email_service = %config.email_service_address,
        "Starting MailFlow user service"
    );

    let metrics = Arc::new(Metrics::new("user_service")?);

    let transport = Arc::new(GrpcDispatch::connect_lazy(
        config.email_service_address.clone(),
        config.email_service_timeout,
    )?);
    let client = Arc::new(ResilientEmailClient::new(
        transport,
        config.retry.clone(),
        config.breaker.clone(),
        config.retry_queue_capacity,
        Arc::clone(&metrics),
    ));
    metrics.register_breaker(Arc::clone(client.breaker()))?;
    metrics.register_queue(Arc::clone(client.queue()))?;

    let users = Arc::new(UserService::new(Arc::new(UserStore::new()), Arc::clone(&client)));

    let (guard, shut) = shutdown::channel();
    tokio::spawn(async move {
        shutdown::wait_for_signal().await;
        guard.trigger();
    });

    let mut workers = Vec::new();
    workers.push(tokio::spawn(Arc::clone(&client).run_drain(shut.clone())));
    workers.push(tokio::spawn(
        Arc::clone(&client).run_depth_reporter(shut.clone()),
    ));
    workers.push(MetricsServer::start(
        config.metrics_port,
        Arc::clone(&metrics),
        shut.clone(),
    ));

    let grpc = UserGrpcService::new(Arc::clone(&users), Arc::clone(&metrics), shut.clone());
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));

    let router = http::router(HttpState {
        users,
        metrics: Arc::clone(&metrics),
        shutdown: shut.clone(),
    });
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;

    info!(%grpc_addr, %http_addr, "servers listening");

    let grpc_shutdown = shut.clone();
    let grpc_server = Server::builder()
        .add_service(grpc.into_server())
        .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await });

    let http_shutdown = shut.clone();
    let http_server = axum::serve(http_listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

    tokio::try_join!(
        async { grpc_server.await.map_err(anyhow::Error::from) },
        async { http_server.await.map_err(anyhow::Error::from) },
    )?;

    let join_all = async {
        for worker in workers {
            let _ = worker.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
        warn!("workers did not stop within the shutdown grace window");
    }

    info!("MailFlow user service shutdown complete");
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
