//! ============================================================================
//! Access Gate - Serialized, shareable front for the access ledger
//! ============================================================================
//! Wraps the ledger in a readers-writer lock so many tasks can query it while
//! mutations run one at a time. Each mutation is planned, sealed, persisted
//! (when a store is attached) and only then committed to memory.
//! ============================================================================

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::events::{ChainError, EventRecord, LedgerEvent};
use super::ledger::{AccessLedger, Eligibility, MemberRecord};
use super::oracle::BalanceOracle;
use crate::types::{Account, Amount, LedgerError};

/// Capacity of the committed-record broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Durable sink that must accept a record before it is committed
pub trait EventStore: Send + Sync {
    fn append_event(&self, record: &EventRecord) -> anyhow::Result<()>;
}

/// Errors surfaced by the access gate
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Event store rejected record: {0}")]
    Store(anyhow::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl GateError {
    /// The domain error, if this failure came from the ledger rules
    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            GateError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

/// Concurrent access gate over an `AccessLedger`
pub struct AccessGate<O> {
    ledger: Arc<RwLock<AccessLedger<O>>>,
    store: Option<Arc<dyn EventStore>>,
    events: broadcast::Sender<EventRecord>,
}

impl<O> Clone for AccessGate<O> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
        }
    }
}

impl<O: BalanceOracle> AccessGate<O> {
    /// In-memory gate, nothing persisted
    pub fn new(ledger: AccessLedger<O>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            store: None,
            events,
        }
    }

    /// Gate that persists every record to `store` before committing it
    pub fn with_store(ledger: AccessLedger<O>, store: Arc<dyn EventStore>) -> Self {
        let mut gate = Self::new(ledger);
        gate.store = Some(store);
        gate
    }

    /// Receive every record committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    // ========================================================================
    // Mutations (single writer)
    // ========================================================================

    pub async fn admit(&self, caller: &Account) -> Result<EventRecord, GateError> {
        self.mutate(|ledger| ledger.plan_admit(caller)).await
    }

    pub async fn set_live_status(
        &self,
        caller: &Account,
        value: bool,
    ) -> Result<EventRecord, GateError> {
        self.mutate(|ledger| ledger.plan_live_status(caller, value)).await
    }

    pub async fn set_threshold(
        &self,
        caller: &Account,
        threshold: Amount,
    ) -> Result<EventRecord, GateError> {
        self.mutate(|ledger| ledger.plan_threshold(caller, threshold)).await
    }

    async fn mutate<F>(&self, plan: F) -> Result<EventRecord, GateError>
    where
        F: FnOnce(&AccessLedger<O>) -> Result<LedgerEvent, LedgerError>,
    {
        let mut ledger = self.ledger.write().await;

        let event = plan(&*ledger)?;
        let record = ledger.seal(event);
        // Nothing reaches the store unless commit would accept it
        ledger.validate(&record)?;

        if let Some(store) = &self.store {
            if let Err(e) = store.append_event(&record) {
                warn!("Failed to persist record {}: {} - state unchanged", record.sequence, e);
                return Err(GateError::Store(e));
            }
            debug!("Persisted record {}", record.sequence);
        }

        ledger.commit(record.clone())?;
        drop(ledger);

        // No receivers is fine
        let receivers = self.events.send(record.clone()).unwrap_or(0);
        debug!(
            "Committed {} #{} to {} subscribers",
            record.event.kind(),
            record.sequence,
            receivers
        );

        Ok(record)
    }

    // ========================================================================
    // Queries (shared readers)
    // ========================================================================

    pub async fn is_member(&self, account: &Account) -> bool {
        self.ledger.read().await.is_member(account)
    }

    pub async fn is_live(&self) -> bool {
        self.ledger.read().await.is_live()
    }

    pub async fn current_threshold(&self) -> Amount {
        self.ledger.read().await.current_threshold()
    }

    pub async fn owner(&self) -> Account {
        *self.ledger.read().await.owner()
    }

    pub async fn eligibility(&self, account: &Account) -> Eligibility {
        self.ledger.read().await.eligibility(account)
    }

    pub async fn members(&self) -> Vec<MemberRecord> {
        self.ledger
            .read()
            .await
            .members()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn member_count(&self) -> usize {
        self.ledger.read().await.member_count()
    }

    /// Committed records with sequence greater than `sequence`
    pub async fn events_since(&self, sequence: u64) -> Vec<EventRecord> {
        self.ledger.read().await.events().since(sequence).to_vec()
    }

    /// Recompute the digest chain of the in-memory log
    pub async fn verify(&self) -> Result<(), ChainError> {
        let ledger = self.ledger.read().await;
        ledger.events().verify()?;
        info!("Event log verified: {} records", ledger.events().len());
        Ok(())
    }
}
