//! ============================================================================
//! Ledger Events - Append-only audit log with a SHA-256 digest chain
//! ============================================================================
//! Every successful mutation produces exactly one `EventRecord`. Records chain
//! to their predecessor's digest; the first record chains to a digest of the
//! full genesis record.
//! ============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use super::ledger::LedgerGenesis;
use crate::types::{Account, Amount, LedgerError};

/// SHA-256 digest of a record (or of the genesis parameters)
pub type Digest = [u8; 32];

const GENESIS_DOMAIN: &[u8] = b"membership-genesis";
const EVENT_DOMAIN: &[u8] = b"membership-event";

/// State transitions recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    /// An account passed the balance check and joined
    MemberJoined { account: Account },
    /// The owner wrote the live flag
    LiveStatusChanged { value: bool },
    /// The owner changed the admission threshold
    ThresholdChanged { previous: Amount, current: Amount },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::MemberJoined { .. } => "member_joined",
            LedgerEvent::LiveStatusChanged { .. } => "live_status_changed",
            LedgerEvent::ThresholdChanged { .. } => "threshold_changed",
        }
    }

    /// Canonical byte encoding fed into the digest
    fn digest_material(&self, hasher: &mut Sha256) {
        hasher.update(self.kind().as_bytes());
        match self {
            LedgerEvent::MemberJoined { account } => hasher.update(account.as_bytes()),
            LedgerEvent::LiveStatusChanged { value } => hasher.update([u8::from(*value)]),
            LedgerEvent::ThresholdChanged { previous, current } => {
                hasher.update(previous.to_le_bytes());
                hasher.update(current.to_le_bytes());
            }
        }
    }
}

/// A sealed, chained event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 1-based position in the log
    pub sequence: u64,
    /// Unix seconds at seal time
    pub timestamp: i64,
    pub event: LedgerEvent,
    #[serde(with = "digest_hex")]
    pub prev_digest: Digest,
    #[serde(with = "digest_hex")]
    pub digest: Digest,
}

impl EventRecord {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Digest anchoring the chain to every field of the genesis record
pub fn genesis_digest(genesis: &LedgerGenesis) -> Digest {
    let symbol = genesis.token.symbol.as_bytes();
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_DOMAIN);
    hasher.update(genesis.owner.as_bytes());
    hasher.update(genesis.threshold.to_le_bytes());
    hasher.update((symbol.len() as u64).to_le_bytes());
    hasher.update(symbol);
    hasher.update([genesis.token.decimals]);
    hasher.update(genesis.created_at.to_le_bytes());
    hasher.finalize().into()
}

pub fn compute_digest(
    prev_digest: &Digest,
    sequence: u64,
    timestamp: i64,
    event: &LedgerEvent,
) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(EVENT_DOMAIN);
    hasher.update(prev_digest);
    hasher.update(sequence.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    event.digest_material(&mut hasher);
    hasher.finalize().into()
}

/// Failures when appending to or replaying the log
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Record {sequence} does not chain to the current head")]
    PrevDigestMismatch { sequence: u64 },

    #[error("Record {sequence} digest does not match its contents")]
    DigestMismatch { sequence: u64 },

    #[error("Record {sequence} is not a valid transition: {reason}")]
    InvalidTransition { sequence: u64, reason: String },
}

impl From<ChainError> for LedgerError {
    fn from(e: ChainError) -> Self {
        LedgerError::Chain(e.to_string())
    }
}

/// Observer notified once per committed record
pub trait EventSink: Send + Sync {
    fn on_event(&self, record: &EventRecord);
}

impl<F> EventSink for F
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn on_event(&self, record: &EventRecord) {
        self(record)
    }
}

/// Append-only, digest-chained event log
#[derive(Debug, Clone)]
pub struct EventLog {
    anchor: Digest,
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new(anchor: Digest) -> Self {
        Self {
            anchor,
            records: Vec::new(),
        }
    }

    pub fn anchor(&self) -> &Digest {
        &self.anchor
    }

    /// Digest the next record must chain to
    pub fn head(&self) -> Digest {
        self.records.last().map(|r| r.digest).unwrap_or(self.anchor)
    }

    pub fn next_sequence(&self) -> u64 {
        self.records.len() as u64 + 1
    }

    /// Build the next record without appending it
    pub fn seal(&self, event: LedgerEvent, timestamp: i64) -> EventRecord {
        let prev_digest = self.head();
        let sequence = self.next_sequence();
        let digest = compute_digest(&prev_digest, sequence, timestamp, &event);
        EventRecord {
            sequence,
            timestamp,
            event,
            prev_digest,
            digest,
        }
    }

    /// Check that `record` is exactly the next link of the chain
    pub fn check_next(&self, record: &EventRecord) -> Result<(), ChainError> {
        let expected = self.next_sequence();
        if record.sequence != expected {
            return Err(ChainError::SequenceGap {
                expected,
                found: record.sequence,
            });
        }
        if record.prev_digest != self.head() {
            return Err(ChainError::PrevDigestMismatch {
                sequence: record.sequence,
            });
        }
        let digest = compute_digest(
            &record.prev_digest,
            record.sequence,
            record.timestamp,
            &record.event,
        );
        if digest != record.digest {
            return Err(ChainError::DigestMismatch {
                sequence: record.sequence,
            });
        }
        Ok(())
    }

    pub fn append(&mut self, record: EventRecord) -> Result<(), ChainError> {
        self.check_next(&record)?;
        self.records.push(record);
        Ok(())
    }

    /// Recompute the whole chain from the anchor
    pub fn verify(&self) -> Result<(), ChainError> {
        let mut replay = EventLog::new(self.anchor);
        for record in &self.records {
            replay.append(record.clone())?;
        }
        Ok(())
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with sequence strictly greater than `sequence`
    pub fn since(&self, sequence: u64) -> &[EventRecord] {
        let start = usize::try_from(sequence)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

mod digest_hex {
    use super::Digest;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Digest, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_: Vec<u8>| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenInfo;

    fn genesis(owner: [u8; 32]) -> LedgerGenesis {
        LedgerGenesis {
            owner: Account::new(owner),
            threshold: 100,
            token: TokenInfo::default(),
            created_at: 1_700_000_000,
        }
    }

    fn log_with(events: Vec<LedgerEvent>) -> EventLog {
        let mut log = EventLog::new(genesis_digest(&genesis([1u8; 32])));
        for (i, event) in events.into_iter().enumerate() {
            let record = log.seal(event, 1_700_000_000 + i as i64);
            log.append(record).unwrap();
        }
        log
    }

    #[test]
    fn test_sealed_records_chain() {
        let log = log_with(vec![
            LedgerEvent::MemberJoined {
                account: Account::new([2u8; 32]),
            },
            LedgerEvent::LiveStatusChanged { value: true },
            LedgerEvent::ThresholdChanged {
                previous: 100,
                current: 200,
            },
        ]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[0].sequence, 1);
        assert_eq!(log.records()[0].prev_digest, *log.anchor());
        assert_eq!(log.records()[1].prev_digest, log.records()[0].digest);
        assert_eq!(log.head(), log.records()[2].digest);
        assert!(log.verify().is_ok());
    }

    #[test]
    fn test_tampered_record_detected() {
        let log = log_with(vec![
            LedgerEvent::LiveStatusChanged { value: true },
            LedgerEvent::LiveStatusChanged { value: false },
        ]);

        let mut records = log.records().to_vec();
        records[1].event = LedgerEvent::LiveStatusChanged { value: true };

        let mut replay = EventLog::new(*log.anchor());
        replay.append(records[0].clone()).unwrap();
        assert_eq!(
            replay.append(records[1].clone()),
            Err(ChainError::DigestMismatch { sequence: 2 })
        );
    }

    #[test]
    fn test_stale_seal_rejected() {
        let mut log = log_with(vec![]);
        let first = log.seal(LedgerEvent::LiveStatusChanged { value: true }, 1);
        let stale = log.seal(LedgerEvent::LiveStatusChanged { value: false }, 2);
        log.append(first).unwrap();

        assert_eq!(
            log.append(stale),
            Err(ChainError::SequenceGap {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_wrong_anchor_detected() {
        let log = log_with(vec![LedgerEvent::LiveStatusChanged { value: true }]);
        let other = genesis_digest(&genesis([9u8; 32]));
        let mut replay = EventLog::new(other);
        assert_eq!(
            replay.append(log.records()[0].clone()),
            Err(ChainError::PrevDigestMismatch { sequence: 1 })
        );
    }

    #[test]
    fn test_genesis_digest_covers_every_field() {
        let base = genesis([1u8; 32]);
        let anchor = genesis_digest(&base);
        assert_eq!(anchor, genesis_digest(&base.clone()));

        let mut raised = base.clone();
        raised.threshold = 101;
        let mut renamed = base.clone();
        renamed.token.symbol = "OTHER".to_string();
        let mut rescaled = base.clone();
        rescaled.token.decimals = 6;
        let mut backdated = base.clone();
        backdated.created_at -= 1;

        for edited in [raised, renamed, rescaled, backdated] {
            assert_ne!(genesis_digest(&edited), anchor);
        }
    }

    #[test]
    fn test_since_slices_by_sequence() {
        let log = log_with(vec![
            LedgerEvent::LiveStatusChanged { value: true },
            LedgerEvent::LiveStatusChanged { value: false },
            LedgerEvent::LiveStatusChanged { value: true },
        ]);
        assert_eq!(log.since(0).len(), 3);
        assert_eq!(log.since(2).len(), 1);
        assert_eq!(log.since(2)[0].sequence, 3);
        assert!(log.since(10).is_empty());
    }

    #[test]
    fn test_record_json_uses_hex_digests() {
        let log = log_with(vec![LedgerEvent::LiveStatusChanged { value: true }]);
        let record = &log.records()[0];
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["digest"], serde_json::json!(record.digest_hex()));
        assert_eq!(json["event"]["live_status_changed"]["value"], true);

        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(&back, record);
    }
}
