#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ehr_kernel_contracts::patient::{Patient, PatientCreateInput};
use ehr_kernel_contracts::{RecordError, RecordErrorKind, RecordId};
use ehr_storage::ledger::{
    FixedLedgerClock, InMemoryLedger, SequentialTxIdSource, StateStore, TransactionContext,
};
use ehr_storage::repo::RecordRepo;

fn ledger() -> InMemoryLedger {
    InMemoryLedger::with_sources(
        Arc::new(FixedLedgerClock(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )),
        Arc::new(SequentialTxIdSource::new("T")),
    )
}

fn alice(id: RecordId) -> Patient {
    Patient::from_input_v1(id, PatientCreateInput::basic_v1("Alice", "555-0100").unwrap())
        .unwrap()
}

#[test]
fn at_records_db_01_raw_read_returns_exact_written_bytes() {
    let l = ledger();
    let written = l
        .execute(|tx| {
            let id = tx.tx_id().clone();
            tx.store_record(&id, &alice(id.clone()))
        })
        .unwrap();

    let mut reader = l.begin().unwrap();
    let raw = reader.load_raw(&written.tx_id).unwrap();
    assert_eq!(raw, written.value);
    assert_eq!(
        String::from_utf8(raw).unwrap(),
        r#"{"id":"T1","name":"Alice","contactNo":"555-0100"}"#
    );
}

#[test]
fn at_records_db_02_typed_load_round_trips() {
    let l = ledger();
    let id = l
        .execute(|tx| {
            let id = tx.tx_id().clone();
            tx.store_record(&id, &alice(id.clone()))?;
            Ok(id)
        })
        .unwrap()
        .value;

    let mut reader = l.begin().unwrap();
    let p: Patient = reader.load_record(&id).unwrap();
    assert_eq!(p, alice(id));
}

#[test]
fn at_records_db_03_missing_and_corrupt_documents_fail_differently() {
    let l = ledger();
    l.execute(|tx| tx.put_state("corrupt", b"{not json".to_vec()))
        .unwrap();

    let mut reader = l.begin().unwrap();
    let missing = reader
        .load_record::<Patient>(&RecordId::new("nope").unwrap())
        .unwrap_err();
    assert_eq!(missing.kind(), RecordErrorKind::NotFound);

    let corrupt = reader
        .load_record::<Patient>(&RecordId::new("corrupt").unwrap())
        .unwrap_err();
    assert_eq!(corrupt.kind(), RecordErrorKind::EncodingError);

    // Raw reads never decode, so corrupt bytes are still readable as-is.
    assert_eq!(
        reader.load_raw(&RecordId::new("corrupt").unwrap()).unwrap(),
        b"{not json".to_vec()
    );
}

#[test]
fn at_records_db_04_wrong_shape_is_an_encoding_error() {
    let l = ledger();
    l.execute(|tx| tx.put_state("T9", br#"{"id":"T9","name":"Bob"}"#.to_vec()))
        .unwrap();
    let mut reader = l.begin().unwrap();
    let err = reader
        .load_record::<Patient>(&RecordId::new("T9").unwrap())
        .unwrap_err();
    assert!(matches!(err, RecordError::EncodingError(_)));
}

#[test]
fn at_records_db_05_document_read_returns_bytes_only_when_well_formed() {
    let l = ledger();
    let id = l
        .execute(|tx| {
            let id = tx.tx_id().clone();
            tx.store_record(&id, &alice(id.clone()))?;
            Ok(id)
        })
        .unwrap()
        .value;
    l.execute(|tx| tx.put_state("T77", b"\x00garbage".to_vec()))
        .unwrap();

    let mut reader = l.begin().unwrap();
    assert_eq!(
        reader.load_document(&id).unwrap(),
        l.committed_value(id.as_str()).unwrap().unwrap()
    );
    let err = reader
        .load_document(&RecordId::new("T77").unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), RecordErrorKind::EncodingError);
    let missing = reader
        .load_document(&RecordId::new("T404").unwrap())
        .unwrap_err();
    assert_eq!(missing.kind(), RecordErrorKind::NotFound);
}
