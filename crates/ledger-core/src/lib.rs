//! ============================================================================
//! LEDGER-CORE: Token-gated membership ledger
//! ============================================================================
//! This crate handles all state and rules for the membership ledger:
//! - Admission of accounts whose token balance meets the threshold
//! - Owner-gated threshold changes and live-status flag
//! - Digest-chained audit log of every state transition
//! - redb persistence with replay on restart
//! ============================================================================

pub mod access;
pub mod config;
pub mod db;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use access::{
    AccessGate, AccessLedger, BalanceOracle, Eligibility, EventRecord, EventSink, GateError,
    InMemoryBalances, LedgerEvent, LedgerGenesis, MemberRecord,
};
pub use config::LedgerConfig;
pub use db::{BalanceEntry, DbStats, LedgerDb};
