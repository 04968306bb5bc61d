//! Email sender core
//!
//! Accepts emails, persists them, and dispatches through the rate limiter
//! to the configured transport. Transient trouble (token exhaustion,
//! delivery failure) diverts the email to the retry queue and still counts
//! as acceptance; a full queue is the only terminal failure. A single
//! background drain worker re-runs the same dispatch path for queued
//! emails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{Email, EmailStatus};
use crate::error::{Error, Result};
use crate::limiter::{Admission, RateLimit};
use crate::metrics::Metrics;
use crate::queue::{QueueProcessor, RetryQueue};
use crate::shutdown::Shutdown;
use crate::store::EmailStore;

/// Delivery transport for outgoing emails
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &'static str;

    /// Deliver one email.
    async fn deliver(&self, email: &Email) -> Result<()>;
}

/// Transport that logs instead of speaking SMTP
///
/// Stands in for a real mail relay; delivery always succeeds.
pub struct LogSender {
    from: String,
}

impl LogSender {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl EmailSender for LogSender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, email: &Email) -> Result<()> {
        info!(
            email_id = %email.id,
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            "email delivery simulated"
        );
        Ok(())
    }
}

/// Tuning for the sender core
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Budget for the inline token wait before a send is queued
    pub send_timeout: Duration,
    /// Pause after a failed drain attempt before pulling the next entry
    pub drain_backoff: Duration,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            drain_backoff: Duration::from_secs(5),
        }
    }
}

/// The email sender core
pub struct EmailService {
    store: Arc<EmailStore>,
    sender: Arc<dyn EmailSender>,
    limiter: Arc<dyn RateLimit>,
    queue: Arc<RetryQueue<String>>,
    metrics: Arc<Metrics>,
    options: SenderOptions,
}

impl EmailService {
    pub fn new(
        store: Arc<EmailStore>,
        sender: Arc<dyn EmailSender>,
        limiter: Arc<dyn RateLimit>,
        queue: Arc<RetryQueue<String>>,
        metrics: Arc<Metrics>,
        options: SenderOptions,
    ) -> Self {
        Self {
            store,
            sender,
            limiter,
            queue,
            metrics,
            options,
        }
    }

    pub fn queue(&self) -> &Arc<RetryQueue<String>> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<EmailStore> {
        &self.store
    }

    /// Accept an email and attempt to dispatch it.
    ///
    /// Returns the persisted record; its status is `Sent` when dispatch
    /// succeeded inline and `Pending` when the email was queued. The only
    /// error a caller sees for an accepted email is `QueueFull`.
    pub async fn send(
        &self,
        shutdown: &Shutdown,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<Email> {
        let start = Instant::now();
        let mut email = Email::new(to, subject, body);
        self.store.insert(email.clone())?;

        debug!(email_id = %email.id, to = %email.to, "email accepted");

        let admission =
            tokio::time::timeout(self.options.send_timeout, self.limiter.wait(shutdown)).await;
        match admission {
            Ok(Ok(Admission::Immediate)) => {}
            Ok(Ok(Admission::Delayed)) => self.metrics.rate_limit_delays.inc(),
            Ok(Err(_)) | Err(_) => {
                // Token wait was cancelled or timed out; hand off to the
                // drain worker instead of blocking the caller further.
                warn!(email_id = %email.id, "rate limit exhausted, queueing email");
                self.metrics.rate_limit_delays.inc();
                self.queue_for_retry(&email.id)?;
                self.observe(start);
                return Ok(email);
            }
        }

        if let Err(err) = self.sender.deliver(&email).await {
            warn!(email_id = %email.id, error = %err, "delivery failed, queueing email");
            self.queue_for_retry(&email.id)?;
            self.observe(start);
            return Ok(email);
        }

        let now = Utc::now();
        self.store
            .update_status(&email.id, EmailStatus::Sent, Some(now))?;
        email.status = EmailStatus::Sent;
        email.sent_at = Some(now);

        self.metrics.emails_sent.inc();
        self.observe(start);
        info!(email_id = %email.id, to = %email.to, "email sent");
        Ok(email)
    }

    pub fn get_status(&self, id: &str) -> Result<Email> {
        self.store.get(id)
    }

    pub fn list(&self, page_size: usize, page_token: &str) -> (Vec<Email>, Option<String>) {
        self.store.list(page_size, page_token)
    }

    /// Put every terminally failed email back on the queue.
    ///
    /// Returns how many were requeued; emails the full queue rejects again
    /// simply stay failed.
    pub fn resend_failed(&self) -> usize {
        let mut requeued = 0;
        for id in self.store.failed_ids() {
            if self.queue_for_retry(&id).is_ok() {
                requeued += 1;
            }
        }
        info!(requeued, "requeued failed emails");
        requeued
    }

    /// Run the sender-side drain worker until shutdown.
    pub async fn run_drain(self: Arc<Self>, shutdown: Shutdown) {
        let queue = Arc::clone(&self.queue);
        queue
            .drain(&shutdown, self.as_ref(), self.options.drain_backoff)
            .await;
    }

    /// Divert an accepted email to the retry queue.
    ///
    /// On accept the status goes (back) to `Pending`; when the queue is
    /// full the email is marked `Failed` and `QueueFull` is returned.
    fn queue_for_retry(&self, id: &str) -> Result<()> {
        match self.queue.enqueue(id.to_string()) {
            Ok(()) => {
                self.metrics.emails_queued.inc();
                self.store.update_status(id, EmailStatus::Pending, None)?;
                debug!(email_id = %id, queue_size = self.queue.len(), "email queued for retry");
                Ok(())
            }
            Err(_) => {
                self.metrics.queue_full_events.inc();
                self.metrics.emails_failed.inc();
                self.store.update_status(id, EmailStatus::Failed, None)?;
                warn!(email_id = %id, "retry queue full, marking email failed");
                Err(Error::QueueFull)
            }
        }
    }

    fn observe(&self, start: Instant) {
        self.metrics
            .processing_duration
            .observe(start.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl QueueProcessor<String> for EmailService {
    async fn process(&self, shutdown: &Shutdown, id: &String, attempts: u32) -> Result<()> {
        let email = match self.store.get(id) {
            Ok(email) => email,
            Err(Error::NotFound(_)) => {
                warn!(email_id = %id, "queued email no longer in store, dropping");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        debug!(email_id = %id, attempts, "processing queued email");
        let start = Instant::now();

        if self.limiter.wait(shutdown).await? == Admission::Delayed {
            self.metrics.rate_limit_delays.inc();
        }

        self.sender.deliver(&email).await?;

        let now = Utc::now();
        self.store.update_status(id, EmailStatus::Sent, Some(now))?;
        self.metrics.emails_sent.inc();
        self.observe(start);
        info!(email_id = %id, to = %email.to, "queued email sent");
        Ok(())
    }

    async fn reject(&self, id: &String, attempts: u32) {
        self.metrics.queue_full_events.inc();
        self.metrics.emails_failed.inc();
        if let Err(err) = self.store.update_status(id, EmailStatus::Failed, None) {
            warn!(email_id = %id, error = %err, "failed to mark rejected email");
        }
        warn!(email_id = %id, attempts, "retry queue full, email marked failed");
    }
}
