//! Environment-driven configuration.
//!
//! Values are read through a lookup function so tests can supply a map
//! instead of touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use einvoice_core::TenantId;
use einvoice_infra::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    /// Postgres when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub registry_base_url: String,
    pub registry_timeout: Duration,
    /// Static bearer token used for every tenant (dev).
    pub registry_token: Option<String>,
    pub credential_ttl: Duration,
    pub webhook_secret: Option<String>,
    pub poll_interval: Duration,
    pub poll_batch_size: usize,
    pub poll_budget: Duration,
    /// Tenants registered with the poll worker at start-up.
    pub poll_tenants: Vec<TenantId>,
    pub dedup_window_secs: i64,
    pub max_cas_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            registry_base_url: "http://localhost:9090/api/v1".to_string(),
            registry_timeout: Duration::from_secs(30),
            registry_token: None,
            credential_ttl: Duration::from_secs(3300),
            webhook_secret: None,
            poll_interval: Duration::from_secs(300),
            poll_batch_size: 50,
            poll_budget: Duration::from_secs(120),
            poll_tenants: Vec::new(),
            dedup_window_secs: 30,
            max_cas_attempts: 5,
            retry: RetryPolicy::exponential(4, Duration::from_millis(500), Duration::from_millis(30_000)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let retry_attempts: u32 = parse(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        let retry_base_ms: u64 = parse(&lookup, "RETRY_BASE_DELAY_MS", 500)?;
        let retry_max_ms: u64 = parse(&lookup, "RETRY_MAX_DELAY_MS", 30_000)?;
        let retry_strategy: BackoffStrategy = parse(&lookup, "RETRY_STRATEGY", defaults.retry.strategy)?;
        if retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let poll_tenants = match text("POLL_TENANTS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<TenantId>().map_err(|e| ConfigError::Invalid {
                        key: "POLL_TENANTS",
                        value: s.to_string(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            bind_addr: text("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: text("DATABASE_URL"),
            registry_base_url: text("REGISTRY_BASE_URL").unwrap_or(defaults.registry_base_url),
            registry_timeout: Duration::from_secs(parse(&lookup, "REGISTRY_TIMEOUT_SECS", 30)?),
            registry_token: text("REGISTRY_TOKEN"),
            credential_ttl: Duration::from_secs(parse(&lookup, "CREDENTIAL_TTL_SECS", 3300)?),
            webhook_secret: text("WEBHOOK_SECRET"),
            poll_interval: Duration::from_secs(parse(&lookup, "POLL_INTERVAL_SECS", 300)?),
            poll_batch_size: parse(&lookup, "POLL_BATCH_SIZE", defaults.poll_batch_size)?,
            poll_budget: Duration::from_secs(parse(&lookup, "POLL_BUDGET_SECS", 120)?),
            poll_tenants,
            dedup_window_secs: parse(&lookup, "DEDUP_WINDOW_SECS", defaults.dedup_window_secs)?,
            max_cas_attempts: parse(&lookup, "MAX_CAS_ATTEMPTS", defaults.max_cas_attempts)?,
            retry: RetryPolicy::exponential(
                retry_attempts,
                Duration::from_millis(retry_base_ms),
                Duration::from_millis(retry_max_ms),
            )
            .with_strategy(retry_strategy),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
