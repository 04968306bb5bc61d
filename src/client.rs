//! Resilient email client
//!
//! Wraps the email-service RPC in the full client-side pipeline:
//! circuit breaker around an exponential-backoff retrier around the call.
//! Requests that cannot leave this side (breaker open, downstream
//! unavailable, deadline exceeded, aborted) divert to a producer-side
//! retry queue whose drain worker re-enters the same pipeline, so a queued
//! request may reach the downstream more than once across an outage; the
//! downstream tolerates duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tracing::{debug, error, info};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::proto;
use crate::proto::email_service_client::EmailServiceClient;
use crate::queue::{QueueProcessor, RetryQueue};
use crate::retry::{Backoff, Retrier};
use crate::shutdown::Shutdown;

/// How often the depth reporter looks at the queue
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default connect timeout for the lazy channel
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A send request parked on the producer side
#[derive(Debug, Clone)]
pub struct QueuedEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Transport seam between the resilience pipeline and the wire
#[async_trait]
pub trait EmailDispatch: Send + Sync {
    /// Hand one email to the email service.
    async fn dispatch(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// gRPC transport for the email service
pub struct GrpcDispatch {
    client: EmailServiceClient<tonic::transport::Channel>,
    endpoint: String,
}

impl GrpcDispatch {
    /// Build a lazily connecting client so the producer can boot while the
    /// email service is down. Every request carries `request_timeout` as
    /// its deadline.
    pub fn connect_lazy(
        address: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let endpoint_str = address.into();

        let channel = Endpoint::from_shared(endpoint_str.clone())
            .map_err(|e| Error::Config(format!("invalid email service address: {e}")))?
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .connect_lazy();

        debug!(endpoint = %endpoint_str, "email service client created");

        Ok(Self {
            client: EmailServiceClient::new(channel),
            endpoint: endpoint_str,
        })
    }
}

#[async_trait]
impl EmailDispatch for GrpcDispatch {
    async fn dispatch(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        // Clients are cheap to clone (Arc increment), which keeps concurrent
        // dispatches from serializing on a lock.
        let mut client = self.client.clone();
        let request = proto::SendEmailRequest {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match client.send_email(request).await {
            Ok(response) => {
                let ack = response.into_inner();
                debug!(email_id = %ack.id, status = %ack.status, "email accepted downstream");
                Ok(())
            }
            Err(status) => {
                debug!(endpoint = %self.endpoint, error = %status, "email dispatch failed");
                match Error::from(status) {
                    // The channel timeout reports as a cancellation, but the
                    // request did go out on the wire.
                    Error::Cancelled => {
                        Err(Error::DeadlineExceeded("email service deadline".into()))
                    }
                    err => Err(err),
                }
            }
        }
    }
}

/// Email client with breaker, retrier, and producer-side retry queue
pub struct ResilientEmailClient {
    transport: Arc<dyn EmailDispatch>,
    breaker: Arc<CircuitBreaker>,
    retrier: Retrier,
    queue: Arc<RetryQueue<QueuedEmail>>,
    metrics: Arc<Metrics>,
    drain_backoff: Duration,
}

impl ResilientEmailClient {
    pub fn new(
        transport: Arc<dyn EmailDispatch>,
        retry: Backoff,
        breaker: BreakerConfig,
        queue_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            breaker: Arc::new(CircuitBreaker::new(breaker)),
            retrier: Retrier::new(retry),
            queue: Arc::new(RetryQueue::new(queue_capacity)),
            metrics,
            drain_backoff: Duration::from_secs(5),
        }
    }

    /// Override the pause between failed drain attempts.
    pub fn with_drain_backoff(mut self, backoff: Duration) -> Self {
        self.drain_backoff = backoff;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn queue(&self) -> &Arc<RetryQueue<QueuedEmail>> {
        &self.queue
    }

    /// Send an email, parking it on the retry queue when the downstream is
    /// unreachable.
    ///
    /// `Ok` means the email was either delivered or queued. Domain errors,
    /// a rejected probe budget, and a full queue surface to the caller.
    pub async fn send(&self, shutdown: &Shutdown, to: &str, subject: &str, body: &str) -> Result<()> {
        let request = QueuedEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match self.try_send_now(shutdown, &request).await {
            Ok(()) => Ok(()),
            Err(err) if err.should_queue() => {
                info!(to = %request.to, error = %err, "email service unreachable, queueing request");
                self.enqueue(request)
            }
            Err(err) => Err(err),
        }
    }

    /// One pass through breaker -> retrier -> transport, no queue fallback.
    async fn try_send_now(&self, shutdown: &Shutdown, request: &QueuedEmail) -> Result<()> {
        self.breaker
            .execute(|| {
                self.retrier.run(shutdown, || {
                    let transport = Arc::clone(&self.transport);
                    let request = request.clone();
                    async move {
                        transport
                            .dispatch(&request.to, &request.subject, &request.body)
                            .await
                    }
                })
            })
            .await
    }

    fn enqueue(&self, request: QueuedEmail) -> Result<()> {
        let to = request.to.clone();
        match self.queue.enqueue(request) {
            Ok(()) => {
                self.metrics.emails_queued.inc();
                debug!(to = %to, queue_size = self.queue.len(), "send request queued");
                Ok(())
            }
            Err(err) => {
                self.metrics.queue_full_events.inc();
                error!(to = %to, "producer-side queue full, dropping send request");
                Err(err)
            }
        }
    }

    /// Run the producer-side drain worker until shutdown.
    pub async fn run_drain(self: Arc<Self>, shutdown: Shutdown) {
        let queue = Arc::clone(&self.queue);
        queue
            .drain(&shutdown, self.as_ref(), self.drain_backoff)
            .await;
    }

    /// Periodically report queue depth until shutdown.
    ///
    /// Drainage is the drain worker's job; this loop only makes a backlog
    /// visible.
    pub async fn run_depth_reporter(self: Arc<Self>, shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(REPORT_INTERVAL) => {}
                _ = shutdown.cancelled() => break,
            }

            let depth = self.queue.len();
            if depth > 0 {
                info!(
                    queue_size = depth,
                    breaker_state = self.breaker.state().as_str(),
                    "send requests waiting in producer-side queue"
                );
            }
        }
    }
}

#[async_trait]
impl QueueProcessor<QueuedEmail> for ResilientEmailClient {
    async fn process(&self, shutdown: &Shutdown, item: &QueuedEmail, attempts: u32) -> Result<()> {
        debug!(to = %item.to, attempts, "retrying queued send request");
        self.try_send_now(shutdown, item).await
    }

    async fn reject(&self, item: &QueuedEmail, attempts: u32) {
        // Terminal on this side: the request never reached the email
        // service and the queue has no room left.
        self.metrics.queue_full_events.inc();
        self.metrics.emails_failed.inc();
        error!(to = %item.to, attempts, "producer-side queue full, send request dropped");
    }
}
