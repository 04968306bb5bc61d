//! Configuration for MailFlow services
//!
//! Everything is environment-driven; each binary loads its own config with
//! `from_env` and fails fast on malformed values.

use std::env;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::{Error, Result};
use crate::retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging knobs shared by both binaries
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    fn from_env() -> Result<Self> {
        let mut config = LogConfig::default();

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.level = level;
        }

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(Error::Config(format!(
                        "invalid LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )))
                }
            };
        }

        Ok(config)
    }
}

/// Configuration for the email-service binary
#[derive(Debug, Clone)]
pub struct EmailServiceConfig {
    /// gRPC server port
    pub grpc_port: u16,

    /// Metrics server port
    pub metrics_port: u16,

    /// Token refill rate (tokens per minute)
    pub emails_per_minute: u32,

    /// Token bucket capacity
    pub max_burst: u32,

    /// Whether the downtime simulator runs
    pub maintenance_enabled: bool,

    /// Up-time between simulated outages
    pub maintenance_frequency: Duration,

    /// Length of each simulated outage
    pub maintenance_downtime: Duration,

    /// Sender-side retry queue capacity
    pub retry_queue_capacity: usize,

    /// Budget for the inline token wait before a send is queued
    pub send_timeout: Duration,

    pub log: LogConfig,
}

impl Default for EmailServiceConfig {
    fn default() -> Self {
        Self {
            grpc_port: 50052,
            metrics_port: 9102,
            emails_per_minute: 60,
            max_burst: 10,
            maintenance_enabled: true,
            maintenance_frequency: Duration::from_secs(5 * 60),
            maintenance_downtime: Duration::from_secs(30),
            retry_queue_capacity: 1000,
            send_timeout: Duration::from_secs(5),
            log: LogConfig::default(),
        }
    }
}

impl EmailServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = EmailServiceConfig::default();

        if let Ok(port) = env::var("SERVER_GRPC_PORT") {
            config.grpc_port = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid SERVER_GRPC_PORT: {e}")))?;
        }

        if let Ok(port) = env::var("MONITOR_METRICS_PORT") {
            config.metrics_port = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid MONITOR_METRICS_PORT: {e}")))?;
        }

        if let Ok(rate) = env::var("EMAIL_RATE_LIMIT_EMAILS_PER_MINUTE") {
            config.emails_per_minute = rate.parse().map_err(|e| {
                Error::Config(format!("invalid EMAIL_RATE_LIMIT_EMAILS_PER_MINUTE: {e}"))
            })?;
        }

        if let Ok(burst) = env::var("EMAIL_RATE_LIMIT_MAX_BURST") {
            config.max_burst = burst
                .parse()
                .map_err(|e| Error::Config(format!("invalid EMAIL_RATE_LIMIT_MAX_BURST: {e}")))?;
        }

        if let Ok(enabled) = env::var("EMAIL_MAINTENANCE_ENABLED") {
            config.maintenance_enabled = parse_bool("EMAIL_MAINTENANCE_ENABLED", &enabled)?;
        }

        if let Ok(frequency) = env::var("EMAIL_MAINTENANCE_FREQUENCY") {
            config.maintenance_frequency =
                parse_duration("EMAIL_MAINTENANCE_FREQUENCY", &frequency)?;
        }

        if let Ok(downtime) = env::var("EMAIL_MAINTENANCE_DOWNTIME_PERIOD") {
            config.maintenance_downtime =
                parse_duration("EMAIL_MAINTENANCE_DOWNTIME_PERIOD", &downtime)?;
        }

        if let Ok(cap) = env::var("EMAIL_RETRY_QUEUE_CAPACITY") {
            config.retry_queue_capacity = cap
                .parse()
                .map_err(|e| Error::Config(format!("invalid EMAIL_RETRY_QUEUE_CAPACITY: {e}")))?;
        }

        if let Ok(timeout) = env::var("EMAIL_SEND_TIMEOUT") {
            config.send_timeout = parse_duration("EMAIL_SEND_TIMEOUT", &timeout)?;
        }

        config.log = LogConfig::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.emails_per_minute == 0 {
            return Err(Error::Config(
                "EMAIL_RATE_LIMIT_EMAILS_PER_MINUTE must be greater than 0".to_string(),
            ));
        }
        if self.max_burst == 0 {
            return Err(Error::Config(
                "EMAIL_RATE_LIMIT_MAX_BURST must be greater than 0".to_string(),
            ));
        }
        if self.retry_queue_capacity == 0 {
            return Err(Error::Config(
                "EMAIL_RETRY_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the user-service binary
#[derive(Debug, Clone)]
pub struct UserServiceConfig {
    /// gRPC server port
    pub grpc_port: u16,

    /// HTTP mirror port
    pub http_port: u16,

    /// Metrics server port
    pub metrics_port: u16,

    /// Email service endpoint, e.g. "http://localhost:50052"
    pub email_service_address: String,

    /// Per-request deadline on outbound email RPCs
    pub email_service_timeout: Duration,

    /// Retry schedule for outbound email RPCs
    pub retry: Backoff,

    /// Circuit breaker guarding the email service
    pub breaker: BreakerConfig,

    /// Producer-side retry queue capacity
    pub retry_queue_capacity: usize,

    pub log: LogConfig,
}

impl Default for UserServiceConfig {
    fn default() -> Self {
        Self {
            grpc_port: 50051,
            http_port: 8080,
            metrics_port: 9101,
            email_service_address: "http://localhost:50052".to_string(),
            email_service_timeout: Duration::from_secs(5),
            retry: Backoff::default(),
            breaker: BreakerConfig::default(),
            retry_queue_capacity: 1000,
            log: LogConfig::default(),
        }
    }
}

impl UserServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = UserServiceConfig::default();

        if let Ok(port) = env::var("SERVER_GRPC_PORT") {
            config.grpc_port = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid SERVER_GRPC_PORT: {e}")))?;
        }

        if let Ok(port) = env::var("SERVER_HTTP_PORT") {
            config.http_port = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid SERVER_HTTP_PORT: {e}")))?;
        }

        if let Ok(port) = env::var("MONITOR_METRICS_PORT") {
            config.metrics_port = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid MONITOR_METRICS_PORT: {e}")))?;
        }

        if let Ok(addr) = env::var("CLIENT_EMAIL_SERVICE_ADDRESS") {
            config.email_service_address = addr;
        }

        if let Ok(timeout) = env::var("CLIENT_EMAIL_SERVICE_TIMEOUT") {
            config.email_service_timeout = parse_duration("CLIENT_EMAIL_SERVICE_TIMEOUT", &timeout)?;
        }

        if let Ok(attempts) = env::var("CLIENT_EMAIL_SERVICE_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts.parse().map_err(|e| {
                Error::Config(format!("invalid CLIENT_EMAIL_SERVICE_RETRY_ATTEMPTS: {e}"))
            })?;
        }

        if let Ok(delay) = env::var("CLIENT_EMAIL_SERVICE_RETRY_DELAY") {
            config.retry.initial_delay = parse_duration("CLIENT_EMAIL_SERVICE_RETRY_DELAY", &delay)?;
        }

        if let Ok(threshold) = env::var("CLIENT_BREAKER_FAILURE_THRESHOLD") {
            config.breaker.failure_threshold = threshold.parse().map_err(|e| {
                Error::Config(format!("invalid CLIENT_BREAKER_FAILURE_THRESHOLD: {e}"))
            })?;
        }

        if let Ok(threshold) = env::var("CLIENT_BREAKER_SUCCESS_THRESHOLD") {
            config.breaker.success_threshold = threshold.parse().map_err(|e| {
                Error::Config(format!("invalid CLIENT_BREAKER_SUCCESS_THRESHOLD: {e}"))
            })?;
        }

        if let Ok(timeout) = env::var("CLIENT_BREAKER_OPEN_TIMEOUT") {
            config.breaker.open_timeout = parse_duration("CLIENT_BREAKER_OPEN_TIMEOUT", &timeout)?;
        }

        if let Ok(max) = env::var("CLIENT_BREAKER_HALF_OPEN_MAX_PROBES") {
            config.breaker.half_open_max_probes = max.parse().map_err(|e| {
                Error::Config(format!("invalid CLIENT_BREAKER_HALF_OPEN_MAX_PROBES: {e}"))
            })?;
        }

        if let Ok(cap) = env::var("CLIENT_RETRY_QUEUE_CAPACITY") {
            config.retry_queue_capacity = cap
                .parse()
                .map_err(|e| Error::Config(format!("invalid CLIENT_RETRY_QUEUE_CAPACITY: {e}")))?;
        }

        config.log = LogConfig::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.email_service_address.is_empty() {
            return Err(Error::Config(
                "CLIENT_EMAIL_SERVICE_ADDRESS is required".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "CLIENT_EMAIL_SERVICE_RETRY_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(Error::Config(
                "breaker thresholds must be greater than 0".to_string(),
            ));
        }
        if self.breaker.half_open_max_probes == 0 {
            return Err(Error::Config(
                "CLIENT_BREAKER_HALF_OPEN_MAX_PROBES must be greater than 0".to_string(),
            ));
        }
        if self.retry_queue_capacity == 0 {
            return Err(Error::Config(
                "CLIENT_RETRY_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Config(format!(
            "invalid {key}: {other} (expected true or false)"
        ))),
    }
}

/// Accepts `250ms`, `30s`, `5m`, or a bare number of seconds.
fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let value = value.trim();
    let parsed = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        value.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(|| {
        Error::Config(format!(
            "invalid {key}: {value} (expected e.g. '500ms', '30s', '5m')"
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_email_service_defaults() {
        let config = EmailServiceConfig::default();
        assert_eq!(config.emails_per_minute, 60);
        assert_eq!(config.max_burst, 10);
        assert!(config.maintenance_enabled);
        assert_eq!(config.maintenance_frequency, Duration::from_secs(300));
        assert_eq!(config.maintenance_downtime, Duration::from_secs(30));
        assert_eq!(config.retry_queue_capacity, 1000);
    }

    #[test]
    fn test_user_service_defaults() {
        let config = UserServiceConfig::default();
        assert_eq!(config.email_service_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.half_open_max_probes, 3);
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(
            parse_duration("K", "250ms").unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(parse_duration("K", "30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("K", "5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("K", "45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("K", "soon").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("K", "true").unwrap());
        assert!(parse_bool("K", "1").unwrap());
        assert!(!parse_bool("K", "false").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }

    #[test]
    fn test_validation_rejects_zero_rate() {
        let config = EmailServiceConfig {
            emails_per_minute: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
