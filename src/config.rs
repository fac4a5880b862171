//! Runtime configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::names;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub sequences: SequenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Upper bound on waiting for a write lock or a pooled connection.
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "branchledger.db".to_string(),
            max_connections: 8,
            lock_timeout_ms: 5_000,
        }
    }
}

/// Counters the ledger itself mints from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub account_name: String,
    pub account_prefix: String,
    pub transaction_name: String,
    pub transaction_prefix: String,
    pub passbook_name: String,
    pub passbook_prefix: String,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            account_name: names::ACCOUNT_NUMBER.to_string(),
            account_prefix: "A".to_string(),
            transaction_name: names::TRANSACTION_NUMBER.to_string(),
            transaction_prefix: "T".to_string(),
            passbook_name: names::PASSBOOK_NUMBER.to_string(),
            passbook_prefix: "PB".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load from `branchledger.toml` (optional) overlaid with
    /// `BRANCHLEDGER__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("branchledger").required(false))
            .add_source(config::Environment::with_prefix("BRANCHLEDGER").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database.path = path.into();
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.database.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.database.path, "branchledger.db");
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.sequences.transaction_name, "TRANSACTION_NUMBER");
        assert_eq!(config.sequences.account_prefix, "A");
    }

    #[test]
    fn test_with_database_path() {
        let config = LedgerConfig::default().with_database_path("/tmp/ledger.db");
        assert_eq!(config.database.path, "/tmp/ledger.db");
    }
}
