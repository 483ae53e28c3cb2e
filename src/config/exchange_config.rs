use super::{env_opt, env_or, env_parse};
use anyhow::Result;

/// Exchange REST access configuration.
#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key: env_opt("EXCHANGE_ACCESS_KEY"),
            secret_key: env_opt("EXCHANGE_SECRET_KEY"),
            base_url: env_or("EXCHANGE_BASE_URL", "https://api.upbit.com"),
            request_timeout_secs: env_parse("EXCHANGE_TIMEOUT_SECS", 10)?,
        })
    }

    /// Without credentials the system runs against the simulated gateway.
    pub fn has_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}
