//! ============================================================================
//! Access Ledger - Membership admission and owner-gated flags
//! ============================================================================
//! Owns the membership registry, the admission threshold and the live flag.
//! Balances come from a `BalanceOracle` the ledger never writes to.
//!
//! Mutations run in three steps so callers can persist a record before it
//! takes effect: `plan_*` validates and yields an event, `seal` chains it
//! into a record, `commit` applies the record.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{
    genesis_digest, ChainError, EventLog, EventRecord, EventSink, LedgerEvent,
};
use super::oracle::BalanceOracle;
use crate::types::{Account, Amount, LedgerError, TokenInfo};

/// Construction parameters, fixed for the lifetime of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerGenesis {
    pub owner: Account,
    pub threshold: Amount,
    #[serde(default)]
    pub token: TokenInfo,
    pub created_at: i64,
}

impl LedgerGenesis {
    pub fn new(owner: Account, threshold: Amount) -> Self {
        Self {
            owner,
            threshold,
            token: TokenInfo::default(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_token(mut self, token: TokenInfo) -> Self {
        self.token = token;
        self
    }
}

/// Registry entry for an admitted account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub account: Account,
    pub joined_at: i64,
    /// Sequence of the `MemberJoined` record that admitted this account
    pub sequence: u64,
}

/// How an account stands against the current threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub account: Account,
    pub balance: Amount,
    pub threshold: Amount,
    pub is_member: bool,
    /// True when `admit` would succeed right now
    pub can_join: bool,
    /// Tokens still missing before the account could join
    pub shortfall: Option<Amount>,
}

/// Deterministic access-control ledger
pub struct AccessLedger<O> {
    oracle: O,
    genesis: LedgerGenesis,
    threshold: Amount,
    live: bool,
    members: BTreeMap<Account, MemberRecord>,
    log: EventLog,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl<O: BalanceOracle> AccessLedger<O> {
    /// Create an empty ledger: no members, live flag off
    pub fn new(oracle: O, threshold: Amount, owner: Account) -> Self {
        Self::from_genesis(oracle, LedgerGenesis::new(owner, threshold))
    }

    pub fn from_genesis(oracle: O, genesis: LedgerGenesis) -> Self {
        info!(
            "Access ledger created: owner {}, threshold {}",
            genesis.owner, genesis.threshold
        );
        Self {
            oracle,
            threshold: genesis.threshold,
            live: false,
            members: BTreeMap::new(),
            log: EventLog::new(genesis_digest(&genesis)),
            sinks: Vec::new(),
            genesis,
        }
    }

    /// Rebuild a ledger by replaying previously committed records.
    /// Sinks are not notified during replay.
    pub fn restore(
        oracle: O,
        genesis: LedgerGenesis,
        records: impl IntoIterator<Item = EventRecord>,
    ) -> Result<Self, ChainError> {
        let mut ledger = Self::from_genesis(oracle, genesis);
        for record in records {
            ledger.check_transition(&record)?;
            ledger.log.append(record.clone())?;
            ledger.apply(&record);
        }
        info!(
            "Access ledger restored: {} events, {} members",
            ledger.log.len(),
            ledger.members.len()
        );
        Ok(ledger)
    }

    // ========================================================================
    // Mutating Operations
    // ========================================================================

    /// Admit `caller` if its balance meets the threshold
    pub fn admit(&mut self, caller: &Account) -> Result<EventRecord, LedgerError> {
        let event = self.plan_admit(caller)?;
        self.seal_and_commit(event)
    }

    /// Owner-only write of the live flag
    pub fn set_live_status(
        &mut self,
        caller: &Account,
        value: bool,
    ) -> Result<EventRecord, LedgerError> {
        let event = self.plan_live_status(caller, value)?;
        self.seal_and_commit(event)
    }

    /// Owner-only change of the admission threshold. Existing members stay.
    pub fn set_threshold(
        &mut self,
        caller: &Account,
        threshold: Amount,
    ) -> Result<EventRecord, LedgerError> {
        let event = self.plan_threshold(caller, threshold)?;
        self.seal_and_commit(event)
    }

    // ========================================================================
    // Planning (pure validation)
    // ========================================================================

    pub fn plan_admit(&self, caller: &Account) -> Result<LedgerEvent, LedgerError> {
        if self.members.contains_key(caller) {
            warn!("Admission rejected: {} is already a member", caller);
            return Err(LedgerError::AlreadyMember { account: *caller });
        }

        let balance = self.oracle.balance_of(caller);
        if balance < self.threshold {
            warn!(
                "Admission rejected: {} holds {}, needs {}",
                caller, balance, self.threshold
            );
            return Err(LedgerError::InsufficientBalance {
                account: *caller,
                balance,
                threshold: self.threshold,
            });
        }

        Ok(LedgerEvent::MemberJoined { account: *caller })
    }

    pub fn plan_live_status(
        &self,
        caller: &Account,
        value: bool,
    ) -> Result<LedgerEvent, LedgerError> {
        self.ensure_owner(caller)?;
        Ok(LedgerEvent::LiveStatusChanged { value })
    }

    pub fn plan_threshold(
        &self,
        caller: &Account,
        threshold: Amount,
    ) -> Result<LedgerEvent, LedgerError> {
        self.ensure_owner(caller)?;
        Ok(LedgerEvent::ThresholdChanged {
            previous: self.threshold,
            current: threshold,
        })
    }

    fn ensure_owner(&self, caller: &Account) -> Result<(), LedgerError> {
        if *caller != self.genesis.owner {
            warn!("Owner-only operation denied for {}", caller);
            return Err(LedgerError::NotOwner { caller: *caller });
        }
        Ok(())
    }

    // ========================================================================
    // Sealing and Commit
    // ========================================================================

    /// Chain `event` onto the current head, stamped with the current time
    pub fn seal(&self, event: LedgerEvent) -> EventRecord {
        self.seal_at(event, chrono::Utc::now().timestamp())
    }

    pub fn seal_at(&self, event: LedgerEvent, timestamp: i64) -> EventRecord {
        self.log.seal(event, timestamp)
    }

    /// Check a sealed record against the chain head and the live rules
    /// without applying it. `commit` runs the same checks.
    pub fn validate(&self, record: &EventRecord) -> Result<(), ChainError> {
        self.check_transition(record)?;
        if let LedgerEvent::MemberJoined { account } = &record.event {
            let balance = self.oracle.balance_of(account);
            if balance < self.threshold {
                return Err(ChainError::InvalidTransition {
                    sequence: record.sequence,
                    reason: format!(
                        "{} holds {}, needs {}",
                        account, balance, self.threshold
                    ),
                });
            }
        }
        self.log.check_next(record)
    }

    /// Apply a sealed record. Rejects records not sealed against the
    /// current head, or that break the admission or owner rules, leaving
    /// state untouched.
    pub fn commit(&mut self, record: EventRecord) -> Result<(), ChainError> {
        if let Err(e) = self.validate(&record) {
            warn!("Commit of record {} rejected: {}", record.sequence, e);
            return Err(e);
        }
        self.log.append(record.clone())?;
        self.apply(&record);
        for sink in &self.sinks {
            sink.on_event(&record);
        }
        Ok(())
    }

    fn seal_and_commit(&mut self, event: LedgerEvent) -> Result<EventRecord, LedgerError> {
        let record = self.seal(event);
        self.commit(record.clone())?;
        Ok(record)
    }

    /// Rules every record must satisfy, live or replayed. Balance checks
    /// are left to `validate`: replay cannot see historical balances.
    fn check_transition(&self, record: &EventRecord) -> Result<(), ChainError> {
        let reason = match &record.event {
            LedgerEvent::MemberJoined { account } if self.members.contains_key(account) => {
                format!("{} is already a member", account)
            }
            LedgerEvent::ThresholdChanged { previous, .. } if *previous != self.threshold => {
                format!(
                    "previous threshold {} does not match current {}",
                    previous, self.threshold
                )
            }
            _ => return Ok(()),
        };
        Err(ChainError::InvalidTransition {
            sequence: record.sequence,
            reason,
        })
    }

    fn apply(&mut self, record: &EventRecord) {
        match &record.event {
            LedgerEvent::MemberJoined { account } => {
                self.members.insert(
                    *account,
                    MemberRecord {
                        account: *account,
                        joined_at: record.timestamp,
                        sequence: record.sequence,
                    },
                );
                info!("Member joined: {} (#{})", account, self.members.len());
            }
            LedgerEvent::LiveStatusChanged { value } => {
                self.live = *value;
                info!("Live status set to {}", value);
            }
            LedgerEvent::ThresholdChanged { previous, current } => {
                self.threshold = *current;
                info!("Threshold changed from {} to {}", previous, current);
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_member(&self, account: &Account) -> bool {
        self.members.contains_key(account)
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn current_threshold(&self) -> Amount {
        self.threshold
    }

    pub fn owner(&self) -> &Account {
        &self.genesis.owner
    }

    pub fn genesis(&self) -> &LedgerGenesis {
        &self.genesis
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn member(&self, account: &Account) -> Option<&MemberRecord> {
        self.members.get(account)
    }

    /// Members in admission order
    pub fn members(&self) -> Vec<&MemberRecord> {
        let mut members: Vec<_> = self.members.values().collect();
        members.sort_by_key(|m| m.sequence);
        members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn events(&self) -> &EventLog {
        &self.log
    }

    pub fn eligibility(&self, account: &Account) -> Eligibility {
        let balance = self.oracle.balance_of(account);
        let is_member = self.is_member(account);
        let shortfall = self.threshold.checked_sub(balance).filter(|s| *s > 0);
        debug!(
            "Eligibility for {}: balance {}, threshold {}, member {}",
            account, balance, self.threshold, is_member
        );

        Eligibility {
            account: *account,
            balance,
            threshold: self.threshold,
            is_member,
            can_join: !is_member && shortfall.is_none(),
            shortfall,
        }
    }

    /// Register an observer for committed records
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}
