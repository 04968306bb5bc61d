//! Prometheus metrics for MailFlow
//!
//! The registry is owned by a `Metrics` value built once at boot and handed
//! to components by reference; there is no process-global registry. Breaker
//! and queue state are exported by scrape-time collectors so the gauges
//! always reflect live state without the components pushing anything.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    Opts, Registry, TextEncoder,
};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::error::{Error, Result};
use crate::queue::RetryQueue;

/// All MailFlow metrics, registered on an owned registry
pub struct Metrics {
    registry: Registry,
    namespace: String,

    /// Requests served (by method)
    pub requests_total: IntCounterVec,

    /// Requests that returned an error (by method)
    pub errors_total: IntCounterVec,

    /// Request latency (by method)
    pub request_duration: HistogramVec,

    /// Emails delivered downstream
    pub emails_sent: IntCounter,

    /// Emails diverted to a retry queue
    pub emails_queued: IntCounter,

    /// Emails terminally failed
    pub emails_failed: IntCounter,

    /// Token waits that had to sleep or gave up
    pub rate_limit_delays: IntCounter,

    /// Simulated maintenance windows entered
    pub downtime_periods: IntCounter,

    /// Enqueue attempts rejected by a full queue
    pub queue_full_events: IntCounter,

    /// End-to-end email processing latency
    pub processing_duration: Histogram,
}

impl Metrics {
    /// Build and register all metrics under `namespace`.
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total requests served").namespace(namespace),
            &["method"],
        )
        .map_err(|e| Error::Internal(format!("requests_total: {e}")))?;

        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Total requests that returned an error")
                .namespace(namespace),
            &["method"],
        )
        .map_err(|e| Error::Internal(format!("errors_total: {e}")))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request latency")
                .namespace(namespace)
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["method"],
        )
        .map_err(|e| Error::Internal(format!("request_duration: {e}")))?;

        let emails_sent = IntCounter::with_opts(
            Opts::new("emails_sent_total", "Successfully delivered emails").namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("emails_sent: {e}")))?;

        let emails_queued = IntCounter::with_opts(
            Opts::new("emails_queued_total", "Emails diverted to a retry queue")
                .namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("emails_queued: {e}")))?;

        let emails_failed = IntCounter::with_opts(
            Opts::new("emails_failed_total", "Terminally failed emails").namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("emails_failed: {e}")))?;

        let rate_limit_delays = IntCounter::with_opts(
            Opts::new(
                "rate_limit_delays_total",
                "Token waits that slept or timed out",
            )
            .namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("rate_limit_delays: {e}")))?;

        let downtime_periods = IntCounter::with_opts(
            Opts::new("downtime_periods_total", "Simulated maintenance windows")
                .namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("downtime_periods: {e}")))?;

        let queue_full_events = IntCounter::with_opts(
            Opts::new(
                "queue_full_events_total",
                "Enqueue attempts rejected by a full queue",
            )
            .namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("queue_full_events: {e}")))?;

        let processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "email_processing_duration_seconds",
                "End-to-end email processing latency",
            )
            .namespace(namespace)
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )
        .map_err(|e| Error::Internal(format!("processing_duration: {e}")))?;

        for collector in [
            Box::new(requests_total.clone()) as Box<dyn Collector>,
            Box::new(errors_total.clone()),
            Box::new(request_duration.clone()),
            Box::new(emails_sent.clone()),
            Box::new(emails_queued.clone()),
            Box::new(emails_failed.clone()),
            Box::new(rate_limit_delays.clone()),
            Box::new(downtime_periods.clone()),
            Box::new(queue_full_events.clone()),
            Box::new(processing_duration.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| Error::Internal(format!("metric registration: {e}")))?;
        }

        Ok(Self {
            registry,
            namespace: namespace.to_string(),
            requests_total,
            errors_total,
            request_duration,
            emails_sent,
            emails_queued,
            emails_failed,
            rate_limit_delays,
            downtime_periods,
            queue_full_events,
            processing_duration,
        })
    }

    /// Record one served request.
    pub fn record_request(&self, method: &str, seconds: f64, ok: bool) {
        self.requests_total.with_label_values(&[method]).inc();
        if !ok {
            self.errors_total.with_label_values(&[method]).inc();
        }
        self.request_duration
            .with_label_values(&[method])
            .observe(seconds);
    }

    /// Export breaker state through a scrape-time collector.
    pub fn register_breaker(&self, breaker: Arc<CircuitBreaker>) -> Result<()> {
        let collector = BreakerCollector::new(&self.namespace, breaker)?;
        self.registry
            .register(Box::new(collector))
            .map_err(|e| Error::Internal(format!("breaker collector: {e}")))
    }

    /// Export queue depth through a scrape-time collector.
    pub fn register_queue<T: Send + 'static>(&self, queue: Arc<RetryQueue<T>>) -> Result<()> {
        let collector = QueueCollector::new(&self.namespace, queue)?;
        self.registry
            .register(Box::new(collector))
            .map_err(|e| Error::Internal(format!("queue collector: {e}")))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode everything in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_ok() {
            String::from_utf8(buffer).unwrap_or_default()
        } else {
            String::new()
        }
    }
}

/// Exports circuit breaker state at scrape time
struct BreakerCollector {
    breaker: Arc<CircuitBreaker>,
    state: GaugeVec,
    failures: Gauge,
    successes: Gauge,
    half_open_in_flight: Gauge,
}

impl BreakerCollector {
    fn new(namespace: &str, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let state = GaugeVec::new(
            Opts::new(
                "state",
                "Current breaker state (1 for the active state, 0 otherwise)",
            )
            .namespace(namespace)
            .subsystem("circuit_breaker"),
            &["state"],
        )
        .map_err(|e| Error::Internal(format!("breaker state gauge: {e}")))?;

        let failures = Gauge::with_opts(
            Opts::new("failures", "Consecutive failures observed while closed")
                .namespace(namespace)
                .subsystem("circuit_breaker"),
        )
        .map_err(|e| Error::Internal(format!("breaker failures gauge: {e}")))?;

        let successes = Gauge::with_opts(
            Opts::new("successes", "Successes observed while half-open")
                .namespace(namespace)
                .subsystem("circuit_breaker"),
        )
        .map_err(|e| Error::Internal(format!("breaker successes gauge: {e}")))?;

        let half_open_in_flight = Gauge::with_opts(
            Opts::new("half_open_in_flight", "Probes admitted this half-open period")
                .namespace(namespace)
                .subsystem("circuit_breaker"),
        )
        .map_err(|e| Error::Internal(format!("breaker in-flight gauge: {e}")))?;

        Ok(Self {
            breaker,
            state,
            failures,
            successes,
            half_open_in_flight,
        })
    }
}

impl Collector for BreakerCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.state.desc();
        descs.extend(self.failures.desc());
        descs.extend(self.successes.desc());
        descs.extend(self.half_open_in_flight.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.breaker.snapshot();

        for state in [
            BreakerState::Closed,
            BreakerState::Open,
            BreakerState::HalfOpen,
        ] {
            let value = if snapshot.state == state { 1.0 } else { 0.0 };
            self.state.with_label_values(&[state.as_str()]).set(value);
        }
        self.failures.set(snapshot.consecutive_failures as f64);
        self.successes.set(snapshot.half_open_successes as f64);
        self.half_open_in_flight
            .set(snapshot.half_open_in_flight as f64);

        let mut families = self.state.collect();
        families.extend(self.failures.collect());
        families.extend(self.successes.collect());
        families.extend(self.half_open_in_flight.collect());
        families
    }
}

/// Exports retry queue depth at scrape time
struct QueueCollector<T> {
    queue: Arc<RetryQueue<T>>,
    size: Gauge,
    capacity: Gauge,
}

impl<T: Send> QueueCollector<T> {
    fn new(namespace: &str, queue: Arc<RetryQueue<T>>) -> Result<Self> {
        let size = Gauge::with_opts(
            Opts::new("queue_size", "Current retry queue depth").namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("queue size gauge: {e}")))?;

        let capacity = Gauge::with_opts(
            Opts::new("queue_capacity", "Retry queue capacity").namespace(namespace),
        )
        .map_err(|e| Error::Internal(format!("queue capacity gauge: {e}")))?;

        Ok(Self {
            queue,
            size,
            capacity,
        })
    }
}

impl<T: Send + 'static> Collector for QueueCollector<T> {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.size.desc();
        descs.extend(self.capacity.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.size.set(self.queue.len() as f64);
        self.capacity.set(self.queue.capacity() as f64);

        let mut families = self.size.collect();
        families.extend(self.capacity.collect());
        families
    }
}
