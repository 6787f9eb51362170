//! Configuration (SPEC_FULL §4 AMBIENT STACK): TOML file + environment
//! override via `Config::load`/`Config::from_env`. Nothing here is
//! tenant data — per-tenant processor credentials live in the `tenants`
//! table behind `TenantConfigRepository`, not in this file, so rotating
//! one tenant's secret never touches a deploy.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub billing_database: DatabaseConfig,
    #[serde(default)]
    pub gl_database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub dunning: DunningDefaultsConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            billing_database: DatabaseConfig::default(),
            gl_database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            idempotency: IdempotencyConfig::default(),
            dunning: DunningDefaultsConfig::default(),
            webhooks: WebhookConfig::default(),
            jobs: JobsConfig::default(),
            event_bus: EventBusConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 30,
        }
    }
}

/// One of these is used for the billing store, one for the physically
/// separate GL store (SPEC_FULL §3: "no foreign-key edges" between them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/billing".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    pub ttl_hours: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: crate::models::DEFAULT_TTL_HOURS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DunningDefaultsConfig {
    pub grace_days: i32,
    pub max_retry_attempts: i32,
}

impl Default for DunningDefaultsConfig {
    fn default() -> Self {
        Self {
            grace_days: 3,
            max_retry_attempts: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub max_attempts: i32,
    pub tick_interval_seconds: u64,
    pub batch_size: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::models::MAX_WEBHOOK_ATTEMPTS,
            tick_interval_seconds: 15,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub renewal_tick_interval_seconds: u64,
    pub dunning_tick_interval_seconds: u64,
    /// How far ahead of `current_period_end` a subscription is considered
    /// due for renewal invoicing (SPEC_FULL §4.12).
    pub renewal_lookahead_days: i64,
    pub event_retention_days: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            renewal_tick_interval_seconds: 60,
            dunning_tick_interval_seconds: 300,
            renewal_lookahead_days: 3,
            event_retention_days: 90,
        }
    }
}

/// Transport the GL Posting Consumer reads from. `Inline` drives the
/// consumer directly off the local event table (suitable for the single
/// reference deployment this crate ships); `Nats`/`Sqs` are supplementary
/// selectors the consumer can be pointed at without touching its logic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventBusTransport {
    Inline,
    Nats,
    Sqs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub transport: EventBusTransport,
    pub endpoint: Option<String>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            transport: EventBusTransport::Inline,
            endpoint: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// `BILLING_CONFIG` env var, then the conventional on-disk locations,
    /// falling back to built-in defaults if none exist.
    pub fn from_env() -> Result<Self> {
        if let Ok(config_path) = std::env::var("BILLING_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/billing/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }
        if self.billing_database.url.is_empty() {
            return Err(Error::Config("billing_database.url must not be empty".to_string()));
        }
        if self.gl_database.url.is_empty() {
            return Err(Error::Config("gl_database.url must not be empty".to_string()));
        }
        if self.idempotency.ttl_hours <= 0 {
            return Err(Error::Config("idempotency.ttl_hours must be positive".to_string()));
        }
        Ok(())
    }
}

/// Per-tenant processor configuration (SPEC_FULL §4.4, §6): account id,
/// webhook signing secret, sandbox flag. Sourced from the `tenants` table
/// via `TenantConfigRepository`, never from the static `Config` above.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantProcessorConfig {
    pub app_id: String,
    pub processor_account_id: String,
    pub processor_api_key: String,
    pub webhook_signing_secret: String,
    pub sandbox_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
