//! Idempotency records - the single authoritative outcome per mandate
//!
//! Every consumption attempt is keyed by `mandate_id`. The first attempt to
//! insert a record wins; every later attempt reads the winner back. The
//! check-then-act is one atomic operation in each store:
//! - `InMemoryIdempotencyStore`: mutex-guarded map entry
//! - `SledIdempotencyStore`: `compare_and_swap` against an absent key

use crate::mandate::{MandateError, TransactionOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use paycentral_env::MandateId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

/// The stored result of the one consumption that actually settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: MandateId,
    pub outcome: TransactionOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(outcome: TransactionOutcome, recorded_at: DateTime<Utc>) -> Self {
        Self {
            key: outcome.mandate_id,
            outcome,
            recorded_at,
        }
    }
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This caller's record was stored
    Inserted(IdempotencyRecord),

    /// A record already existed; it is returned unchanged
    Existing(IdempotencyRecord),
}

impl Claim {
    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            Claim::Inserted(record) | Claim::Existing(record) => record,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Claim::Inserted(_))
    }
}

/// Shared store of idempotency records.
///
/// Implementations must be thread-safe and make `insert_if_absent` atomic.
pub trait IdempotencyStore: Send + Sync {
    /// Stores `record` unless a record for the same key exists.
    fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<Claim, MandateError>;

    /// Looks up the record for a mandate.
    fn get(&self, key: &MandateId) -> Result<Option<IdempotencyRecord>, MandateError>;

    /// Number of stored records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store, used by the simulator (one per run).
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<MandateId, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<Claim, MandateError> {
        let mut records = self.records.lock();
        match records.entry(record.key) {
            Entry::Occupied(existing) => Ok(Claim::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(Claim::Inserted(record))
            }
        }
    }

    fn get(&self, key: &MandateId) -> Result<Option<IdempotencyRecord>, MandateError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

/// Sled-based persistent store
///
/// Records survive restarts, so a mandate settled before a crash is
/// still replayed afterwards instead of being charged again.
pub struct SledIdempotencyStore {
    db: sled::Db,
}

impl SledIdempotencyStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MandateError> {
        let db = sled::open(path)
            .map_err(|e| MandateError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store, removed on drop
    pub fn open_temp() -> Result<Self, MandateError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| MandateError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<IdempotencyRecord, MandateError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MandateError::Serialization(format!("Corrupt idempotency record: {}", e)))
    }
}

impl IdempotencyStore for SledIdempotencyStore {
    fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<Claim, MandateError> {
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| MandateError::Serialization(e.to_string()))?;

        let swap = self
            .db
            .compare_and_swap(record.key.as_bytes(), None::<&[u8]>, Some(encoded))
            .map_err(|e| MandateError::Storage(format!("Compare-and-swap failed: {}", e)))?;

        match swap {
            Ok(()) => {
                self.db
                    .flush()
                    .map_err(|e| MandateError::Storage(format!("Flush failed: {}", e)))?;
                Ok(Claim::Inserted(record))
            }
            Err(conflict) => match conflict.current {
                Some(current) => Ok(Claim::Existing(Self::decode(&current)?)),
                None => Err(MandateError::Storage(format!(
                    "Compare-and-swap conflict without a stored value for {}",
                    record.key
                ))),
            },
        }
    }

    fn get(&self, key: &MandateId) -> Result<Option<IdempotencyRecord>, MandateError> {
        let stored = self
            .db
            .get(key.as_bytes())
            .map_err(|e| MandateError::Storage(format!("Read failed: {}", e)))?;
        stored.map(|bytes| Self::decode(&bytes)).transpose()
    }

    fn len(&self) -> usize {
        self.db.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::sync::Barrier;

    fn outcome(id: MandateId, payment: &str) -> TransactionOutcome {
        TransactionOutcome {
            mandate_id: id,
            payment_id: payment.to_string(),
            amount: Decimal::new(460196, 2),
            currency: "INR".to_string(),
            recurrence: None,
            settled_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn record(id: MandateId, payment: &str) -> IdempotencyRecord {
        let outcome = outcome(id, payment);
        let at = outcome.settled_at;
        IdempotencyRecord::new(outcome, at)
    }

    fn first_writer_wins(store: &dyn IdempotencyStore) {
        let id = MandateId::from_seed(11);

        let first = store.insert_if_absent(record(id, "pay_first")).unwrap();
        assert!(first.is_inserted());

        let second = store.insert_if_absent(record(id, "pay_second")).unwrap();
        assert!(!second.is_inserted());
        assert_eq!(second.record().outcome.payment_id, "pay_first");

        assert_eq!(store.get(&id).unwrap().unwrap().outcome.payment_id, "pay_first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_in_memory_first_writer_wins() {
        first_writer_wins(&InMemoryIdempotencyStore::new());
    }

    #[test]
    fn test_sled_first_writer_wins() {
        first_writer_wins(&SledIdempotencyStore::open_temp().unwrap());
    }

    #[test]
    fn test_missing_key() {
        let store = SledIdempotencyStore::open_temp().unwrap();
        assert!(store.is_empty());
        assert!(store.get(&MandateId::from_seed(3)).unwrap().is_none());
    }

    #[test]
    fn test_sled_records_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("paycentral_idem_{}", MandateId::new()));
        let id = MandateId::from_seed(5);

        {
            let store = SledIdempotencyStore::open(&dir).unwrap();
            store.insert_if_absent(record(id, "pay_persisted")).unwrap();
        }

        {
            let store = SledIdempotencyStore::open(&dir).unwrap();
            let claim = store.insert_if_absent(record(id, "pay_after_restart")).unwrap();
            assert_eq!(claim.record().outcome.payment_id, "pay_persisted");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_concurrent_inserts_single_winner() {
        let store = SledIdempotencyStore::open_temp().unwrap();
        let id = MandateId::from_seed(99);
        let barrier = Barrier::new(50);

        let claims: Vec<Claim> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..50)
                .map(|i| {
                    let store = &store;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        store.insert_if_absent(record(id, &format!("pay_{}", i))).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(claims.iter().filter(|c| c.is_inserted()).count(), 1);
        let winner = claims.iter().find(|c| c.is_inserted()).unwrap().record().clone();
        assert!(claims.iter().all(|c| c.record() == &winner));
        assert_eq!(store.len(), 1);
    }
}
