//! Configuration loading from environment variables, organized by concern:
//! exchange access, execution pipeline, risk limits, and worker cadence.

mod exchange_config;
mod execution_config;
mod risk_config;
mod worker_config;

pub use exchange_config::ExchangeEnvConfig;
pub use execution_config::ExecutionEnvConfig;
pub use risk_config::RiskEnvConfig;
pub use worker_config::WorkerEnvConfig;

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Aggregated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exchange: ExchangeEnvConfig,
    pub execution: ExecutionEnvConfig,
    pub risk: RiskEnvConfig,
    pub workers: WorkerEnvConfig,
    pub database_url: String,
    pub http_bind: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            exchange: ExchangeEnvConfig::from_env()?,
            execution: ExecutionEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            workers: WorkerEnvConfig::from_env()?,
            database_url: env_or("DATABASE_URL", "sqlite://data/wontrader.db"),
            http_bind: env_or("HTTP_BIND", "127.0.0.1:8090"),
        })
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
/// A set-but-unparseable value is an error, not a silent fallback.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("invalid boolean for {}: '{}'", key, other),
        },
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}
