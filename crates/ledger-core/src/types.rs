//! ============================================================================
//! Core Types for the Membership Ledger
//! ============================================================================
//! Account identifiers, token display info, and the ledger error taxonomy.
//! Accounts are rendered as base58 so they read like wallet addresses.
//! ============================================================================

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw token units as reported by the balance oracle
pub type Amount = u64;

/// Length of an account identifier in bytes
pub const ACCOUNT_LEN: usize = 32;

/// Opaque account identifier (public-key derived address)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account([u8; ACCOUNT_LEN]);

impl Account {
    pub const fn new(bytes: [u8; ACCOUNT_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh account identifier from the OS RNG
    pub fn random() -> Self {
        let mut bytes = [0u8; ACCOUNT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_LEN] {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self)
    }
}

impl FromStr for Account {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| LedgerError::InvalidAccount(format!("{}: {}", s, e)))?;

        let bytes: [u8; ACCOUNT_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            LedgerError::InvalidAccount(format!(
                "{}: expected {} bytes, got {}",
                s,
                ACCOUNT_LEN,
                v.len()
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Account {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.to_string()
    }
}

/// Display metadata for the fungible token the oracle reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenInfo {
    fn default() -> Self {
        Self {
            symbol: "TOKEN".to_string(),
            decimals: 0,
        }
    }
}

impl TokenInfo {
    /// Render a raw amount in human units, e.g. "1.50K TOKEN"
    pub fn display_amount(&self, raw: Amount) -> String {
        format!("{} {}", format_amount(raw, self.decimals), self.symbol)
    }
}

/// Format a raw amount with K/M/B suffixes
pub fn format_amount(raw: Amount, decimals: u8) -> String {
    let amount = raw as f64 / 10f64.powi(decimals as i32);

    if amount >= 1_000_000_000.0 {
        format!("{:.2}B", amount / 1_000_000_000.0)
    } else if amount >= 1_000_000.0 {
        format!("{:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.2}K", amount / 1_000.0)
    } else {
        format!("{:.2}", amount)
    }
}

/// Validate a signed threshold coming from an outer surface
pub fn threshold_from_signed(value: i128) -> Result<Amount, LedgerError> {
    if value < 0 {
        return Err(LedgerError::InvalidThreshold(format!(
            "threshold must be non-negative, got {}",
            value
        )));
    }
    Amount::try_from(value).map_err(|_| {
        LedgerError::InvalidThreshold(format!("threshold {} exceeds {}", value, Amount::MAX))
    })
}

/// Parse threshold text such as "100" or "-5"
pub fn parse_threshold(text: &str) -> Result<Amount, LedgerError> {
    let value = text
        .trim()
        .parse::<i128>()
        .map_err(|e| LedgerError::InvalidThreshold(format!("'{}': {}", text, e)))?;
    threshold_from_signed(value)
}

/// Error types for the membership ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LedgerError {
    #[error("Account {account} is already a member")]
    AlreadyMember { account: Account },

    #[error("Insufficient balance for {account}: have {balance}, need {threshold}")]
    InsufficientBalance {
        account: Account,
        balance: Amount,
        threshold: Amount,
    },

    #[error("Caller {caller} is not the ledger owner")]
    NotOwner { caller: Account },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Event log rejected record: {0}")]
    Chain(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_base58_roundtrip() {
        let account = Account::new([7u8; ACCOUNT_LEN]);
        let text = account.to_string();
        assert_eq!(text.parse::<Account>().unwrap(), account);
    }

    #[test]
    fn test_account_rejects_wrong_length() {
        let short = bs58::encode([1u8; 16]).into_string();
        assert!(matches!(
            short.parse::<Account>(),
            Err(LedgerError::InvalidAccount(_))
        ));
        assert!("not-base58-0OIl".parse::<Account>().is_err());
    }

    #[test]
    fn test_random_accounts_differ() {
        assert_ne!(Account::random(), Account::random());
    }

    #[test]
    fn test_account_serializes_as_string() {
        let account = Account::new([3u8; ACCOUNT_LEN]);
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, format!("\"{}\"", account));
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn test_threshold_validation() {
        assert_eq!(parse_threshold("100"), Ok(100));
        assert_eq!(parse_threshold(" 0 "), Ok(0));
        assert!(matches!(
            parse_threshold("-5"),
            Err(LedgerError::InvalidThreshold(_))
        ));
        assert!(matches!(
            threshold_from_signed(i128::from(u64::MAX) + 1),
            Err(LedgerError::InvalidThreshold(_))
        ));
        assert!(parse_threshold("lots").is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(500, 0), "500.00");
        assert_eq!(format_amount(1_500, 0), "1.50K");
        assert_eq!(format_amount(1_500_000_000, 6), "1.50K");
        assert_eq!(format_amount(2_500_000, 0), "2.50M");
        assert_eq!(format_amount(1_500_000_000, 0), "1.50B");
    }

    #[test]
    fn test_token_display_amount() {
        let token = TokenInfo {
            symbol: "PASS".into(),
            decimals: 2,
        };
        assert_eq!(token.display_amount(15_000), "150.00 PASS");
    }
}
