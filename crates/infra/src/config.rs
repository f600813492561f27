//! Runtime configuration loaded from the environment.

use std::time::Duration;

use anyhow::Context;

use stockledger_observability::LogFormat;

pub const LOCK_TIMEOUT_VAR: &str = "STOCKLEDGER_LOCK_TIMEOUT_MS";
pub const COMMIT_RETRIES_VAR: &str = "STOCKLEDGER_COMMIT_RETRIES";
pub const LOG_VAR: &str = "STOCKLEDGER_LOG";
pub const LOG_FORMAT_VAR: &str = "STOCKLEDGER_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long confirm/delete wait for the stock keys they touch.
    pub lock_timeout: Duration,
    /// Extra attempts after an optimistic commit conflict.
    pub commit_retries: u32,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5_000),
            commit_retries: 3,
            log_filter: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl LedgerConfig {
    /// Read `STOCKLEDGER_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`LedgerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(LOCK_TIMEOUT_VAR) {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{LOCK_TIMEOUT_VAR} must be a whole number of milliseconds, got '{raw}'"))?;
            config.lock_timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(COMMIT_RETRIES_VAR) {
            config.commit_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("{COMMIT_RETRIES_VAR} must be a non-negative integer, got '{raw}'"))?;
        }
        if let Some(raw) = lookup(LOG_VAR).filter(|v| !v.trim().is_empty()) {
            config.log_filter = raw.trim().to_string();
        }
        if let Some(raw) = lookup(LOG_FORMAT_VAR) {
            config.log_format = raw
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {LOG_FORMAT_VAR}"))?;
        }

        Ok(config)
    }

    /// Install the process-wide tracing subscriber described by this config.
    pub fn init_tracing(&self) {
        stockledger_observability::init_with(&self.log_filter, self.log_format);
    }
}
