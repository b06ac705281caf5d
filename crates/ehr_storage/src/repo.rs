#![forbid(unsafe_code)]

use ehr_kernel_contracts::{RecordError, RecordId};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;

use crate::ledger::StateStore;

/// Typed record persistence over any [`StateStore`].
///
/// One self-describing JSON document per key; no secondary indexes.
pub trait RecordRepo: StateStore {
    /// Stored bytes exactly as last written.
    fn load_raw(&mut self, key: &RecordId) -> Result<Vec<u8>, RecordError> {
        self.get_state(key.as_str())?
            .ok_or_else(|| RecordError::not_found(key.as_str()))
    }

    /// Stored bytes, unchanged, after checking they still hold a JSON document.
    fn load_document(&mut self, key: &RecordId) -> Result<Vec<u8>, RecordError> {
        let bytes = self.load_raw(key)?;
        decode_record::<IgnoredAny>(key, &bytes)?;
        Ok(bytes)
    }

    fn load_record<R: DeserializeOwned>(&mut self, key: &RecordId) -> Result<R, RecordError> {
        let bytes = self.load_raw(key)?;
        decode_record(key, &bytes)
    }

    /// Writes the record and returns the exact bytes handed to the store.
    fn store_record<R: Serialize>(
        &mut self,
        key: &RecordId,
        record: &R,
    ) -> Result<Vec<u8>, RecordError> {
        let bytes = encode_record(key, record)?;
        self.put_state(key.as_str(), bytes.clone())?;
        Ok(bytes)
    }
}

impl<T: StateStore + ?Sized> RecordRepo for T {}

pub fn encode_record<R: Serialize>(key: &RecordId, record: &R) -> Result<Vec<u8>, RecordError> {
    serde_json::to_vec(record)
        .map_err(|e| RecordError::EncodingError(format!("record {key}: failed to serialize: {e}")))
}

pub fn decode_record<R: DeserializeOwned>(key: &RecordId, bytes: &[u8]) -> Result<R, RecordError> {
    serde_json::from_slice(bytes).map_err(|e| {
        RecordError::EncodingError(format!("record {key}: stored document is malformed: {e}"))
    })
}
