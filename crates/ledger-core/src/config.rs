//! ============================================================================
//! Ledger Configuration - Environment driven settings
//! ============================================================================
//! Values come from the process environment, optionally seeded from a `.env`
//! file. Command-line flags take precedence over anything loaded here.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::types::{parse_threshold, Account, Amount, TokenInfo};

pub const ENV_DB_PATH: &str = crate::db::DB_PATH_ENV;
pub const ENV_OWNER: &str = "MEMBERSHIP_OWNER";
pub const ENV_THRESHOLD: &str = "MEMBERSHIP_THRESHOLD";
pub const ENV_TOKEN_SYMBOL: &str = "MEMBERSHIP_TOKEN_SYMBOL";
pub const ENV_TOKEN_DECIMALS: &str = "MEMBERSHIP_TOKEN_DECIMALS";
pub const ENV_LOG: &str = "MEMBERSHIP_LOG";

/// Default tracing directive when MEMBERSHIP_LOG is unset
pub const DEFAULT_LOG_FILTER: &str = "ledger_core=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Database file; None falls back to ~/.membership/ledger.redb
    pub db_path: Option<String>,
    /// Default owner for `init`
    pub owner: Option<Account>,
    /// Default threshold for `init`
    pub threshold: Option<Amount>,
    pub token: TokenInfo,
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            owner: None,
            threshold: None,
            token: TokenInfo::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Seed the process environment from a `.env` file, if one is found
pub fn load_dotenv() -> Result<PathBuf> {
    dotenvy::dotenv().map_err(|e| anyhow!("No .env file loaded: {}", e))
}

/// Tracing directive alone. Never fails, so logging can start before the
/// rest of the configuration is validated.
pub fn log_filter_from_env() -> String {
    log_filter_from_lookup(|key| std::env::var(key).ok())
}

pub fn log_filter_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(ENV_LOG)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

impl LedgerConfig {
    /// Load `.env` (if present) and read the environment
    pub fn load() -> Result<Self> {
        match load_dotenv() {
            Ok(path) => debug!("Loaded {}", path.display()),
            Err(e) => debug!("{}", e),
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        config.db_path = lookup(ENV_DB_PATH).filter(|s| !s.trim().is_empty());

        if let Some(owner) = lookup(ENV_OWNER) {
            config.owner = Some(
                owner
                    .parse()
                    .map_err(|e| anyhow!("Invalid {}: {}", ENV_OWNER, e))?,
            );
        }

        if let Some(threshold) = lookup(ENV_THRESHOLD) {
            config.threshold = Some(
                parse_threshold(&threshold)
                    .map_err(|e| anyhow!("Invalid {}: {}", ENV_THRESHOLD, e))?,
            );
        }

        if let Some(symbol) = lookup(ENV_TOKEN_SYMBOL) {
            config.token.symbol = symbol;
        }

        if let Some(decimals) = lookup(ENV_TOKEN_DECIMALS) {
            config.token.decimals = decimals
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {}: {}", ENV_TOKEN_DECIMALS, e))?;
        }

        config.log_filter = log_filter_from_lookup(&lookup);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = LedgerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_reads_all_keys() {
        let owner = Account::random();
        let owner_text = owner.to_string();
        let config = LedgerConfig::from_lookup(lookup_from(&[
            (ENV_DB_PATH, "/tmp/ledger.redb"),
            (ENV_OWNER, owner_text.as_str()),
            (ENV_THRESHOLD, "100"),
            (ENV_TOKEN_SYMBOL, "PASS"),
            (ENV_TOKEN_DECIMALS, "6"),
            (ENV_LOG, "debug"),
        ]))
        .unwrap();

        assert_eq!(config.db_path.as_deref(), Some("/tmp/ledger.redb"));
        assert_eq!(config.owner, Some(owner));
        assert_eq!(config.threshold, Some(100));
        assert_eq!(config.token.symbol, "PASS");
        assert_eq!(config.token.decimals, 6);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let result = LedgerConfig::from_lookup(lookup_from(&[(ENV_THRESHOLD, "-1")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_owner() {
        let result = LedgerConfig::from_lookup(lookup_from(&[(ENV_OWNER, "nope")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_log_filter_ignores_malformed_settings() {
        let lookup = lookup_from(&[
            (ENV_OWNER, "nope"),
            (ENV_THRESHOLD, "-1"),
            (ENV_LOG, "ledger_core=debug"),
        ]);
        assert!(LedgerConfig::from_lookup(&lookup).is_err());
        assert_eq!(log_filter_from_lookup(&lookup), "ledger_core=debug");

        assert_eq!(log_filter_from_lookup(|_| None), DEFAULT_LOG_FILTER);
        assert_eq!(
            log_filter_from_lookup(lookup_from(&[(ENV_LOG, " ")])),
            DEFAULT_LOG_FILTER
        );
    }
}
