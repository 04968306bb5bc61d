//! MailFlow - user and email services with a resilient dispatch pipeline
//!
//! Two binaries share this library. The user-service persists users and
//! fires welcome emails through a client-side resilience pipeline; the
//! email-service admits emails through a token bucket and a scheduled
//! downtime window, diverting anything it cannot dispatch right away to a
//! bounded retry queue.
//!
//! # Dispatch pipeline
//!
//! ```text
//! Producer ──► ResilientEmailClient ──► CircuitBreaker ──► Retrier ──► gRPC
//!                      │                                                │
//!                      ▼                                                ▼
//!            producer-side RetryQueue                        TokenBucket ──► transport
//!                                                                 │
//!                                                                 ▼
//!                                                      sender-side RetryQueue
//! ```
//!
//! Each queue has one drain worker that re-enters the same path, so a
//! queued email survives an outage without the caller ever seeing a
//! transient failure.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod breaker;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod grpc;
pub mod http;
pub mod limiter;
pub mod maintenance;
pub mod metrics;
pub mod metrics_server;
pub mod queue;
pub mod retry;
pub mod sender;
pub mod shutdown;
pub mod store;
pub mod user;

// Types generated from proto/mailflow/v1
pub mod proto {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::derive_partial_eq_without_eq)]

    tonic::include_proto!("mailflow.v1");
}

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{EmailDispatch, GrpcDispatch, QueuedEmail, ResilientEmailClient};
pub use config::{EmailServiceConfig, LogFormat, UserServiceConfig};
pub use domain::{Email, EmailStatus, User};
pub use error::{Error, Result};
pub use grpc::{EmailGrpcService, UserGrpcService};
pub use limiter::{Admission, RateLimit, TokenBucket};
pub use maintenance::{AvailabilityFlag, DowntimeSimulator};
pub use metrics::Metrics;
pub use metrics_server::MetricsServer;
pub use queue::{QueueProcessor, RetryQueue};
pub use retry::{Backoff, Retrier};
pub use sender::{EmailSender, EmailService, LogSender, SenderOptions};
pub use shutdown::{Shutdown, ShutdownGuard};
pub use store::{EmailStore, UserStore};
pub use user::UserService;
