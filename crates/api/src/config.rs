//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use idempotency::IdempotencyConfig;
use saga::SagaConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `LOG_PARTITIONS`: partitions per event log topic (default: `4`)
/// - `DATABASE_URL`: selects the PostgreSQL idempotency store when set
/// - `AUTH_TIMEOUT_MS`: payment gateway call timeout (default: `2000`)
/// - `AUTH_MAX_ATTEMPTS`: authorization attempts per checkout (default: `3`)
/// - `CONSUMER_MAX_ATTEMPTS`: deliveries before dead-lettering (default: `5`)
/// - `IDEMPOTENCY_RETENTION_SECS`: how long dedup records live (default: 7 days)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_partitions: u32,
    pub database_url: Option<String>,
    pub auth_timeout: Duration,
    pub auth_max_attempts: u32,
    pub consumer_max_attempts: u32,
    pub idempotency_retention: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.log_format),
            log_partitions: parse_var(&lookup, "LOG_PARTITIONS")
                .filter(|&partitions: &u32| partitions > 0)
                .unwrap_or(defaults.log_partitions),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            auth_timeout: parse_var(&lookup, "AUTH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.auth_timeout),
            auth_max_attempts: parse_var(&lookup, "AUTH_MAX_ATTEMPTS")
                .filter(|&attempts: &u32| attempts > 0)
                .unwrap_or(defaults.auth_max_attempts),
            consumer_max_attempts: parse_var(&lookup, "CONSUMER_MAX_ATTEMPTS")
                .filter(|&attempts: &u32| attempts > 0)
                .unwrap_or(defaults.consumer_max_attempts),
            idempotency_retention: parse_var(&lookup, "IDEMPOTENCY_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idempotency_retention),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga tunables derived from this configuration.
    pub fn saga_config(&self) -> SagaConfig {
        let defaults = SagaConfig::default();
        SagaConfig {
            authorization_timeout: self.auth_timeout,
            authorization_backoff: defaults
                .authorization_backoff
                .with_max_attempts(self.auth_max_attempts),
            consumer_backoff: defaults
                .consumer_backoff
                .with_max_attempts(self.consumer_max_attempts),
            ..defaults
        }
    }

    pub fn idempotency_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            retention: self.idempotency_retention,
            ..IdempotencyConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_partitions: 4,
            database_url: None,
            auth_timeout: Duration::from_millis(2000),
            auth_max_attempts: 3,
            consumer_max_attempts: 5,
            idempotency_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
