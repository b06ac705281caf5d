#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ehr_kernel_contracts::{RecordError, RecordId};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Name of the post-commit signal emitted by every successful mutation.
pub const CHANGE_EVENT_NAME: &str = "eventInvoke";

/// Committed-state access from inside one transaction, one key at a time.
pub trait StateStore {
    /// `Ok(None)` means the key has never been written. It is not a failure.
    fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecordError>;

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), RecordError>;
}

pub trait ChangeNotifier {
    /// Stages the transaction's change event. Published only if the transaction commits;
    /// a later call in the same transaction replaces the earlier one.
    fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<(), RecordError>;
}

/// Everything the record engine needs from the platform for one transaction.
pub trait TransactionContext: StateStore + ChangeNotifier {
    fn tx_id(&self) -> &RecordId;

    fn tx_timestamp(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub tx_id: RecordId,
    pub name: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub tx_id: RecordId,
    pub value: T,
}

/// Runs a closure inside a fresh transaction and commits it if the closure succeeds.
pub trait TransactionRunner {
    fn run_transaction<T, F>(&self, f: F) -> Result<Committed<T>, RecordError>
    where
        F: FnOnce(&mut dyn TransactionContext) -> Result<T, RecordError>;
}

pub trait LedgerClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLedgerClock;

impl LedgerClock for SystemLedgerClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedLedgerClock(pub DateTime<Utc>);

impl LedgerClock for FixedLedgerClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub trait TxIdSource: Send + Sync {
    fn next_tx_id(&self, seq: u64) -> Result<RecordId, RecordError>;
}

/// 64 lowercase hex characters: SHA-256 over a random nonce and the ledger's tx sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTxIdSource;

impl TxIdSource for RandomTxIdSource {
    fn next_tx_id(&self, seq: u64) -> Result<RecordId, RecordError> {
        let nonce: [u8; 24] = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(seq.to_be_bytes());
        let hex = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Ok(RecordId::new(hex)?)
    }
}

/// `<prefix><seq>`, e.g. `T1`, `T2`. Deterministic ids for tests and local tooling.
#[derive(Debug, Clone)]
pub struct SequentialTxIdSource {
    prefix: String,
}

impl SequentialTxIdSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TxIdSource for SequentialTxIdSource {
    fn next_tx_id(&self, seq: u64) -> Result<RecordId, RecordError> {
        Ok(RecordId::new(format!("{}{}", self.prefix, seq))?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionedValue {
    value: Vec<u8>,
    version: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<String, VersionedValue>,
    last_version: u64,
    last_tx_seq: u64,
    events: Vec<ChangeEvent>,
    subscribers: Vec<Sender<ChangeEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_id: RecordId,
    pub written_keys: usize,
    pub event: Option<ChangeEvent>,
}

/// In-process stand-in for the ledger platform.
///
/// Keeps versioned single-key state and validates each transaction's read set at commit:
/// if any key it read has been written by another transaction since, the commit is rejected
/// with `RecordError::Conflict` and nothing is applied.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    clock: Arc<dyn LedgerClock>,
    tx_ids: Arc<dyn TxIdSource>,
}

impl fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLedger").finish_non_exhaustive()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_sources(Arc::new(SystemLedgerClock), Arc::new(RandomTxIdSource))
    }

    pub fn with_sources(clock: Arc<dyn LedgerClock>, tx_ids: Arc<dyn TxIdSource>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            clock,
            tx_ids,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, RecordError> {
        self.state
            .lock()
            .map_err(|_| RecordError::StorageError("ledger state lock poisoned".to_string()))
    }

    pub fn begin(&self) -> Result<LedgerTx, RecordError> {
        let seq = {
            let mut state = self.lock()?;
            state.last_tx_seq += 1;
            state.last_tx_seq
        };
        let tx_id = self.tx_ids.next_tx_id(seq)?;
        Ok(LedgerTx {
            ledger: self.clone(),
            tx_id,
            timestamp: self.clock.now(),
            read_set: BTreeMap::new(),
            write_set: BTreeMap::new(),
            event: None,
        })
    }

    pub fn commit(&self, tx: LedgerTx) -> Result<CommitReceipt, RecordError> {
        if !Arc::ptr_eq(&self.state, &tx.ledger.state) {
            return Err(RecordError::StorageError(
                "transaction was opened on a different ledger".to_string(),
            ));
        }
        let mut state = self.lock()?;
        for (key, seen_version) in &tx.read_set {
            let current = state.entries.get(key).map(|v| v.version);
            if current != *seen_version {
                warn!(tx_id = %tx.tx_id, key = %key, "read set invalidated by a concurrent commit");
                return Err(RecordError::Conflict { key: key.clone() });
            }
        }

        let written_keys = tx.write_set.len();
        for (key, value) in tx.write_set {
            state.last_version += 1;
            let version = state.last_version;
            state.entries.insert(key, VersionedValue { value, version });
        }

        let event = tx.event.map(|(name, payload)| ChangeEvent {
            tx_id: tx.tx_id.clone(),
            name,
            payload,
        });
        if let Some(e) = &event {
            state.events.push(e.clone());
            state.subscribers.retain(|s| s.send(e.clone()).is_ok());
        }
        debug!(tx_id = %tx.tx_id, written_keys, "transaction committed");
        Ok(CommitReceipt {
            tx_id: tx.tx_id,
            written_keys,
            event,
        })
    }

    /// Begin, run `f`, and commit. A failing `f` discards the transaction untouched.
    pub fn execute<T, F>(&self, f: F) -> Result<Committed<T>, RecordError>
    where
        F: FnOnce(&mut LedgerTx) -> Result<T, RecordError>,
    {
        let mut tx = self.begin()?;
        let value = f(&mut tx)?;
        let receipt = self.commit(tx)?;
        Ok(Committed {
            tx_id: receipt.tx_id,
            value,
        })
    }

    pub fn subscribe(&self) -> Result<Receiver<ChangeEvent>, RecordError> {
        let (sender, receiver) = mpsc::channel();
        self.lock()?.subscribers.push(sender);
        Ok(receiver)
    }

    pub fn committed_value(&self, key: &str) -> Result<Option<Vec<u8>>, RecordError> {
        Ok(self.lock()?.entries.get(key).map(|v| v.value.clone()))
    }

    pub fn key_count(&self) -> Result<usize, RecordError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn committed_events(&self) -> Result<Vec<ChangeEvent>, RecordError> {
        Ok(self.lock()?.events.clone())
    }
}

impl TransactionRunner for InMemoryLedger {
    fn run_transaction<T, F>(&self, f: F) -> Result<Committed<T>, RecordError>
    where
        F: FnOnce(&mut dyn TransactionContext) -> Result<T, RecordError>,
    {
        self.execute(|tx| f(tx))
    }
}

/// One open transaction against an [`InMemoryLedger`].
///
/// Reads see committed state only. Writes and the change event are staged until commit.
#[derive(Debug)]
pub struct LedgerTx {
    ledger: InMemoryLedger,
    tx_id: RecordId,
    timestamp: DateTime<Utc>,
    read_set: BTreeMap<String, Option<u64>>,
    write_set: BTreeMap<String, Vec<u8>>,
    event: Option<(String, Vec<u8>)>,
}

impl LedgerTx {
    pub fn staged_write_count(&self) -> usize {
        self.write_set.len()
    }

    pub fn staged_event_name(&self) -> Option<&str> {
        self.event.as_ref().map(|(name, _)| name.as_str())
    }
}

fn validate_key(key: &str) -> Result<(), RecordError> {
    if key.is_empty() {
        return Err(RecordError::InvalidArgument(
            "ledger key must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl StateStore for LedgerTx {
    fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecordError> {
        validate_key(key)?;
        let state = self.ledger.lock()?;
        let entry = state.entries.get(key);
        self.read_set
            .entry(key.to_string())
            .or_insert(entry.map(|v| v.version));
        Ok(entry.map(|v| v.value.clone()))
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), RecordError> {
        validate_key(key)?;
        self.write_set.insert(key.to_string(), value);
        Ok(())
    }
}

impl ChangeNotifier for LedgerTx {
    fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<(), RecordError> {
        if name.is_empty() {
            return Err(RecordError::InvalidArgument(
                "event name must not be empty".to_string(),
            ));
        }
        self.event = Some((name.to_string(), payload));
        Ok(())
    }
}

impl TransactionContext for LedgerTx {
    fn tx_id(&self) -> &RecordId {
        &self.tx_id
    }

    fn tx_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
