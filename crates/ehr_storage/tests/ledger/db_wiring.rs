#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ehr_kernel_contracts::{RecordError, RecordId};
use ehr_storage::ledger::{
    ChangeNotifier, FixedLedgerClock, InMemoryLedger, SequentialTxIdSource, StateStore,
    TransactionContext, TransactionRunner, CHANGE_EVENT_NAME,
};

fn ledger() -> InMemoryLedger {
    InMemoryLedger::with_sources(
        Arc::new(FixedLedgerClock(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 42, 37).unwrap(),
        )),
        Arc::new(SequentialTxIdSource::new("T")),
    )
}

#[test]
fn at_ledger_db_01_absent_key_is_not_an_error() {
    let l = ledger();
    let mut tx = l.begin().unwrap();
    assert_eq!(tx.get_state("never_written").unwrap(), None);
}

#[test]
fn at_ledger_db_02_commit_applies_writes_and_publishes_event() {
    let l = ledger();
    let events = l.subscribe().unwrap();

    let mut tx = l.begin().unwrap();
    assert_eq!(tx.tx_id().as_str(), "T1");
    tx.put_state("T1", b"{\"id\":\"T1\"}".to_vec()).unwrap();
    tx.set_event(CHANGE_EVENT_NAME, Vec::new()).unwrap();
    let receipt = l.commit(tx).unwrap();

    assert_eq!(receipt.written_keys, 1);
    assert_eq!(
        l.committed_value("T1").unwrap().as_deref(),
        Some(&b"{\"id\":\"T1\"}"[..])
    );
    let published = events.try_recv().unwrap();
    assert_eq!(published.name, CHANGE_EVENT_NAME);
    assert!(published.payload.is_empty());
    assert_eq!(published.tx_id, RecordId::new("T1").unwrap());
    assert_eq!(l.committed_events().unwrap().len(), 1);
}

#[test]
fn at_ledger_db_03_uncommitted_transaction_leaves_no_trace() {
    let l = ledger();
    {
        let mut tx = l.begin().unwrap();
        tx.put_state("T1", b"x".to_vec()).unwrap();
        tx.set_event(CHANGE_EVENT_NAME, Vec::new()).unwrap();
    }
    assert_eq!(l.key_count().unwrap(), 0);
    assert!(l.committed_events().unwrap().is_empty());
}

#[test]
fn at_ledger_db_04_failed_closure_discards_staged_writes() {
    let l = ledger();
    let out: Result<_, RecordError> = l.execute(|tx| {
        tx.put_state("T1", b"x".to_vec())?;
        tx.set_event(CHANGE_EVENT_NAME, Vec::new())?;
        Err::<(), _>(RecordError::ParseError("birthday".to_string()))
    });
    assert!(matches!(out, Err(RecordError::ParseError(_))));
    assert_eq!(l.key_count().unwrap(), 0);
    assert!(l.committed_events().unwrap().is_empty());
}

#[test]
fn at_ledger_db_05_stale_read_set_is_rejected_as_conflict() {
    let l = ledger();
    l.execute(|tx| tx.put_state("doc", b"v0".to_vec())).unwrap();

    let mut first = l.begin().unwrap();
    let mut second = l.begin().unwrap();
    assert_eq!(first.get_state("doc").unwrap().as_deref(), Some(&b"v0"[..]));
    assert_eq!(second.get_state("doc").unwrap().as_deref(), Some(&b"v0"[..]));
    first.put_state("doc", b"v1-first".to_vec()).unwrap();
    second.put_state("doc", b"v1-second".to_vec()).unwrap();

    l.commit(first).unwrap();
    let err = l.commit(second).unwrap_err();
    assert_eq!(
        err,
        RecordError::Conflict {
            key: "doc".to_string()
        }
    );
    assert_eq!(
        l.committed_value("doc").unwrap().as_deref(),
        Some(&b"v1-first"[..])
    );
}

#[test]
fn at_ledger_db_06_phantom_create_of_a_read_absent_key_conflicts() {
    let l = ledger();
    let mut reader = l.begin().unwrap();
    assert_eq!(reader.get_state("doc").unwrap(), None);
    reader.put_state("other", b"x".to_vec()).unwrap();

    l.execute(|tx| tx.put_state("doc", b"created".to_vec()))
        .unwrap();
    assert!(matches!(
        l.commit(reader),
        Err(RecordError::Conflict { .. })
    ));
    assert_eq!(l.committed_value("other").unwrap(), None);
}

#[test]
fn at_ledger_db_07_blind_writes_do_not_conflict() {
    let l = ledger();
    let mut a = l.begin().unwrap();
    let mut b = l.begin().unwrap();
    a.put_state("a", b"1".to_vec()).unwrap();
    b.put_state("b", b"2".to_vec()).unwrap();
    l.commit(b).unwrap();
    l.commit(a).unwrap();
    assert_eq!(l.key_count().unwrap(), 2);
}

#[test]
fn at_ledger_db_08_runner_hands_out_transaction_id_and_timestamp() {
    let l = ledger();
    let committed = l
        .run_transaction(|ctx| {
            let id = ctx.tx_id().clone();
            ctx.put_state(id.as_str(), b"doc".to_vec())?;
            Ok(ctx.tx_timestamp())
        })
        .unwrap();
    assert_eq!(committed.tx_id.as_str(), "T1");
    assert_eq!(
        committed.value,
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 42, 37).unwrap()
    );
    assert!(l.committed_value("T1").unwrap().is_some());
}

#[test]
fn at_ledger_db_09_last_staged_event_wins() {
    let l = ledger();
    let mut tx = l.begin().unwrap();
    tx.set_event("first", b"a".to_vec()).unwrap();
    tx.set_event(CHANGE_EVENT_NAME, Vec::new()).unwrap();
    assert_eq!(tx.staged_event_name(), Some(CHANGE_EVENT_NAME));
    let receipt = l.commit(tx).unwrap();
    assert_eq!(receipt.event.unwrap().name, CHANGE_EVENT_NAME);
    assert_eq!(l.committed_events().unwrap().len(), 1);
}
