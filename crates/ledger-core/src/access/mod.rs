//! ============================================================================
//! Access Module - Token-gated membership with owner-controlled flags
//! ============================================================================
//! An account joins once its token balance meets the threshold. The owner
//! fixed at construction may change the threshold and toggle the live flag.
//!
//! ## Layers
//! - **oracle**: read-only balance source (`BalanceOracle`)
//! - **ledger**: synchronous state machine (`AccessLedger`)
//! - **events**: digest-chained audit log (`EventLog`)
//! - **gate**: async single-writer wrapper with broadcast (`AccessGate`)
//!
//! ## Usage
//! ```rust,ignore
//! use ledger_core::access::{AccessGate, AccessLedger, InMemoryBalances};
//!
//! let oracle = Arc::new(InMemoryBalances::new());
//! let gate = AccessGate::new(AccessLedger::new(oracle.clone(), 100, owner));
//! gate.admit(&caller).await?;
//! ```
//! ============================================================================

mod events;
mod gate;
mod ledger;
mod oracle;

// Re-export public types
pub use events::{
    compute_digest, genesis_digest, ChainError, Digest, EventLog, EventRecord, EventSink,
    LedgerEvent,
};
pub use gate::{AccessGate, EventStore, GateError, DEFAULT_EVENT_CHANNEL_CAPACITY};
pub use ledger::{AccessLedger, Eligibility, LedgerGenesis, MemberRecord};
pub use oracle::{BalanceOracle, InMemoryBalances};
