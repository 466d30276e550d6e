//! Ledger configuration.

use std::time::Duration;

/// Store connection and locking configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// How long a transaction waits for a row lock before failing.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Store configuration.
    pub store: StoreConfig,
    /// Log level, used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.store.database_url = Some(url);
            }
        }

        if let Ok(max) = std::env::var("LEDGER_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.store.max_connections = max;
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_ACQUIRE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.store.acquire_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.store.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            if format.eq_ignore_ascii_case("json") {
                config.log_format = LogFormat::Json;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.max_connections == 0 {
            return Err("Max connections cannot be 0".to_string());
        }

        if self.store.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be 0".to_string());
        }

        if let Some(url) = &self.store.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(format!("Unsupported database URL: {}", url));
            }
        }

        Ok(())
    }
}
