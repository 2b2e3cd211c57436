use std::env;
use std::str::FromStr;

use crate::messaging::subscription::AckMode;

const DEFAULT_PREFETCH_COUNT: u16 = 10;
const DEFAULT_METRICS_PORT: u16 = 9090;

#[derive(Debug, Clone)]
pub struct Config {
    pub rabbitmq_url: String,
    pub service_name: String,
    pub exchange_name: String,
    pub queue_name: String,
    pub rust_log: String,
    pub prefetch_count: u16,
    pub ack_mode: AckMode,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingRequired(key))
        };

        Ok(Self {
            rabbitmq_url: required("RABBITMQ_URL")?,
            service_name: required("SERVICE_NAME")?,
            exchange_name: required("EXCHANGE_NAME")?,
            queue_name: required("QUEUE_NAME")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            prefetch_count: parse_or(&lookup, "PREFETCH_COUNT", DEFAULT_PREFETCH_COUNT)?,
            ack_mode: parse_or(&lookup, "ACK_MODE", AckMode::Manual)?,
            metrics_port: parse_or(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT)?,
        })
    }

    /// Unique per process so several listeners can share a queue.
    pub fn consumer_tag(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.service_name, &id[..8])
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
