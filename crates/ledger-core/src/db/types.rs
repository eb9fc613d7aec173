//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Account, Amount};

/// One row of the local balance sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub account: Account,
    pub amount: Amount,
}

/// Summary counts for the database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    /// Whether `init` has been run
    pub initialized: bool,
    pub total_events: usize,
    /// Event count keyed by event kind
    pub event_counts: HashMap<String, usize>,
    pub last_sequence: u64,
    pub total_balances: usize,
}
