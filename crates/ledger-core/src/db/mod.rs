// ============================================================================
// LedgerDb — Embedded Database (redb)
// ============================================================================
// Persistent storage for the ledger genesis, the append-only event log, and
// the local balance sheet used as a balance oracle.
// Default path: ~/.membership/ledger.redb (override via MEMBERSHIP_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{BalanceEntry, DbStats};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::access::{AccessLedger, BalanceOracle, EventRecord, EventStore, LedgerGenesis};
use crate::types::{Account, Amount};

// Table definitions
const GENESIS: TableDefinition<&str, &[u8]> = TableDefinition::new("genesis");
const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");
const BALANCES: TableDefinition<&str, u64> = TableDefinition::new("balances");

const GENESIS_KEY: &str = "genesis:ledger";

/// Environment variable overriding the database location
pub const DB_PATH_ENV: &str = "MEMBERSHIP_DB_PATH";

/// Resolve the database path: explicit argument, then env var, then home dir
pub fn resolve_db_path(path: Option<&str>) -> Result<PathBuf> {
    if let Some(p) = path {
        return Ok(PathBuf::from(p));
    }
    if let Ok(env_path) = std::env::var(DB_PATH_ENV) {
        if !env_path.trim().is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".membership").join("ledger.redb"))
}

/// Embedded database for the membership ledger
pub struct LedgerDb {
    db: Database,
    path: PathBuf,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses MEMBERSHIP_DB_PATH or ~/.membership/ledger.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = resolve_db_path(path)?;
        Self::open_at(db_path)
    }

    pub fn open_at(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(GENESIS)
                .map_err(|e| anyhow!("Failed to create genesis table: {}", e))?;
            let _ = write_txn
                .open_table(EVENTS)
                .map_err(|e| anyhow!("Failed to create events table: {}", e))?;
            let _ = write_txn
                .open_table(BALANCES)
                .map_err(|e| anyhow!("Failed to create balances table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Genesis Operations
    // ========================================================================

    /// Store construction parameters. Fails if the ledger was already initialized.
    pub fn init_genesis(&self, genesis: &LedgerGenesis) -> Result<()> {
        let value = bincode::serialize(genesis)
            .map_err(|e| anyhow!("Failed to serialize genesis: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(GENESIS)
                .map_err(|e| anyhow!("Failed to open genesis table: {}", e))?;
            let exists = table.get(GENESIS_KEY)
                .map_err(|e| anyhow!("Failed to read genesis: {}", e))?
                .is_some();
            if exists {
                return Err(anyhow!("Ledger already initialized at {}", self.path.display()));
            }
            table.insert(GENESIS_KEY, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert genesis: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Ledger initialized: owner {}, threshold {}", genesis.owner, genesis.threshold);
        Ok(())
    }

    pub fn get_genesis(&self) -> Result<Option<LedgerGenesis>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(GENESIS)
            .map_err(|e| anyhow!("Failed to open genesis table: {}", e))?;

        match table.get(GENESIS_KEY).map_err(|e| anyhow!("Failed to get genesis: {}", e))? {
            Some(value) => {
                let genesis: LedgerGenesis = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize genesis: {}", e))?;
                Ok(Some(genesis))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Event Log Operations
    // ========================================================================

    /// Append a record. Only the next sequence number is accepted.
    pub fn append_event(&self, record: &EventRecord) -> Result<()> {
        let value = bincode::serialize(record)
            .map_err(|e| anyhow!("Failed to serialize event: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(EVENTS)
                .map_err(|e| anyhow!("Failed to open events table: {}", e))?;
            let last = table.last()
                .map_err(|e| anyhow!("Failed to read last event: {}", e))?
                .map(|(key, _)| key.value())
                .unwrap_or(0);
            if record.sequence != last + 1 {
                return Err(anyhow!(
                    "Event log is append-only: expected sequence {}, got {}",
                    last + 1,
                    record.sequence
                ));
            }
            table.insert(record.sequence, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert event: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored event {} ({})", record.sequence, record.event.kind());
        Ok(())
    }

    pub fn list_events(&self) -> Result<Vec<EventRecord>> {
        self.events_since(0)
    }

    /// Records with sequence strictly greater than `sequence`
    pub fn events_since(&self, sequence: u64) -> Result<Vec<EventRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(EVENTS)
            .map_err(|e| anyhow!("Failed to open events table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range(sequence.saturating_add(1)..)
            .map_err(|e| anyhow!("Failed to iterate events: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: EventRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize event: {}", e))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Rebuild the ledger from genesis and the stored event log
    pub fn load_ledger<O: BalanceOracle>(&self, oracle: O) -> Result<AccessLedger<O>> {
        let genesis = self.get_genesis()?.ok_or_else(|| {
            anyhow!(
                "Ledger not initialized at {} (run init first)",
                self.path.display()
            )
        })?;
        let records = self.list_events()?;

        AccessLedger::restore(oracle, genesis, records)
            .map_err(|e| anyhow!("Stored event log is corrupt: {}", e))
    }

    // ========================================================================
    // Balance Sheet Operations
    // ========================================================================

    pub fn set_balance(&self, account: &Account, amount: Amount) -> Result<()> {
        let key = account.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(BALANCES)
                .map_err(|e| anyhow!("Failed to open balances table: {}", e))?;
            table.insert(key.as_str(), amount)
                .map_err(|e| anyhow!("Failed to insert balance: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored balance {} for {}", amount, key);
        Ok(())
    }

    pub fn get_balance(&self, account: &Account) -> Result<Amount> {
        let key = account.to_string();

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(BALANCES)
            .map_err(|e| anyhow!("Failed to open balances table: {}", e))?;

        let amount = table.get(key.as_str())
            .map_err(|e| anyhow!("Failed to get balance: {}", e))?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(amount)
    }

    pub fn list_balances(&self) -> Result<Vec<BalanceEntry>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(BALANCES)
            .map_err(|e| anyhow!("Failed to open balances table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate balances: {}", e))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let account: Account = key.value().parse()
                .map_err(|e| anyhow!("Corrupt balance key '{}': {}", key.value(), e))?;
            results.push(BalanceEntry {
                account,
                amount: value.value(),
            });
        }
        Ok(results)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let events = self.list_events()?;
        let balances = self.list_balances()?;

        let mut event_counts = std::collections::HashMap::new();
        for record in &events {
            *event_counts.entry(record.event.kind().to_string()).or_insert(0usize) += 1;
        }

        Ok(DbStats {
            initialized: self.get_genesis()?.is_some(),
            total_events: events.len(),
            event_counts,
            last_sequence: events.last().map(|r| r.sequence).unwrap_or(0),
            total_balances: balances.len(),
        })
    }
}

impl BalanceOracle for LedgerDb {
    fn balance_of(&self, account: &Account) -> Amount {
        match self.get_balance(account) {
            Ok(amount) => amount,
            Err(e) => {
                // Unreadable balance = no balance; admission fails closed
                warn!("Failed to read balance for {}: {} - assuming 0", account, e);
                0
            }
        }
    }
}

impl EventStore for LedgerDb {
    fn append_event(&self, record: &EventRecord) -> Result<()> {
        LedgerDb::append_event(self, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessGate, LedgerEvent};
    use crate::types::LedgerError;
    use std::sync::Arc;

    fn temp_db() -> LedgerDb {
        let path = std::env::temp_dir().join(format!("membership-{}.redb", uuid::Uuid::new_v4()));
        LedgerDb::open_at(path).unwrap()
    }

    #[test]
    fn test_genesis_written_once() {
        let db = temp_db();
        assert!(db.get_genesis().unwrap().is_none());

        let genesis = LedgerGenesis::new(Account::random(), 100);
        db.init_genesis(&genesis).unwrap();
        assert_eq!(db.get_genesis().unwrap(), Some(genesis.clone()));

        assert!(db.init_genesis(&LedgerGenesis::new(Account::random(), 1)).is_err());
        assert_eq!(db.get_genesis().unwrap(), Some(genesis));
    }

    #[test]
    fn test_balances_act_as_oracle() {
        let db = temp_db();
        let alice = Account::random();
        assert_eq!(db.balance_of(&alice), 0);

        db.set_balance(&alice, 150).unwrap();
        assert_eq!(db.balance_of(&alice), 150);
        assert_eq!(
            db.list_balances().unwrap(),
            vec![BalanceEntry {
                account: alice,
                amount: 150
            }]
        );
    }

    #[test]
    fn test_event_log_is_append_only() {
        let db = temp_db();
        let genesis = LedgerGenesis::new(Account::random(), 0);
        db.init_genesis(&genesis).unwrap();

        let db = Arc::new(db);
        let mut ledger = db.load_ledger(db.clone()).unwrap();
        let first = ledger.seal_at(LedgerEvent::LiveStatusChanged { value: true }, 10);
        db.append_event(&first).unwrap();
        ledger.commit(first.clone()).unwrap();

        // Replaying the same sequence is rejected
        assert!(db.append_event(&first).is_err());

        let skipped = EventRecord {
            sequence: 3,
            ..first.clone()
        };
        assert!(db.append_event(&skipped).is_err());
        assert_eq!(db.list_events().unwrap(), vec![first]);
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let path = std::env::temp_dir().join(format!("membership-{}.redb", uuid::Uuid::new_v4()));
        let owner = Account::random();
        let alice = Account::random();
        let head;

        {
            let db = Arc::new(LedgerDb::open_at(path.clone()).unwrap());
            db.init_genesis(&LedgerGenesis::new(owner, 100)).unwrap();
            db.set_balance(&alice, 150).unwrap();

            let mut ledger = db.load_ledger(db.clone()).unwrap();
            let record = ledger.admit(&alice).unwrap();
            db.append_event(&record).unwrap();
            let record = ledger.set_live_status(&owner, true).unwrap();
            db.append_event(&record).unwrap();
            head = ledger.events().head();
        }

        let db = Arc::new(LedgerDb::open_at(path).unwrap());
        let ledger = db.load_ledger(db.clone()).unwrap();
        assert!(ledger.is_member(&alice));
        assert!(ledger.is_live());
        assert_eq!(ledger.current_threshold(), 100);
        assert_eq!(ledger.events().head(), head);

        let stats = db.stats().unwrap();
        assert!(stats.initialized);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.last_sequence, 2);
        assert_eq!(stats.event_counts.get("member_joined"), Some(&1));
        assert_eq!(stats.total_balances, 1);
    }

    #[tokio::test]
    async fn test_gate_persists_through_db() {
        let db = Arc::new(temp_db());
        let owner = Account::random();
        db.init_genesis(&LedgerGenesis::new(owner, 10)).unwrap();

        let gate = AccessGate::with_store(db.load_ledger(db.clone()).unwrap(), db.clone());
        let bob = Account::random();
        db.set_balance(&bob, 5).unwrap();

        let err = gate.admit(&bob).await.unwrap_err();
        assert!(matches!(
            err.ledger_error(),
            Some(LedgerError::InsufficientBalance { balance: 5, .. })
        ));
        assert!(db.list_events().unwrap().is_empty());

        db.set_balance(&bob, 10).unwrap();
        let record = gate.admit(&bob).await.unwrap();
        assert_eq!(db.list_events().unwrap(), vec![record]);
        assert_eq!(db.events_since(1).unwrap(), vec![]);
    }

    #[test]
    fn test_load_requires_init() {
        let db = Arc::new(temp_db());
        assert!(db.load_ledger(db.clone()).is_err());
    }
}
