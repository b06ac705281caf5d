#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ehr_engines::record_engine::{RecordEngine, INIT_FUNCTION};
use ehr_kernel_contracts::ehr::{EhrCreateInput, EhrSchema, SubRecordInput};
use ehr_kernel_contracts::patient::PatientCreateInput;
use ehr_kernel_contracts::{ContractViolation, RecordError, RecordId};
use ehr_storage::ledger::TransactionContext;
use tracing::info;

pub mod operation_names {
    pub const CREATE_PATIENT: &str = "createPatient";
    pub const GET_PATIENT: &str = "getPatient";
    pub const VIEW_DETAILS: &str = "viewDetails";
    pub const CREATE_EHR: &str = "createEHR";
    pub const GET_EHR: &str = "getEHR";
    pub const UPDATE_FILE_UPLOADS: &str = "updateFileUploads";
    pub const UPDATE_EHR: &str = "updateEHR";

    // Older client names, still routed.
    pub const VIEW_PATIENT_DETAILS: &str = "viewPatientDetails";
    pub const GET_PATIENT_DETAILS: &str = "getPatientDetails";
}

/// Successful result of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    RecordId(RecordId),
    Document(Vec<u8>),
}

impl OperationOutput {
    /// Bytes returned to the ledger client.
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            OperationOutput::RecordId(id) => id.as_str().as_bytes().to_vec(),
            OperationOutput::Document(bytes) => bytes,
        }
    }
}

type OperationHandler = fn(
    &RecordEngine,
    &mut dyn TransactionContext,
    &[String],
) -> Result<OperationOutput, RecordError>;

#[derive(Clone, Copy)]
pub struct OperationEntry {
    pub name: &'static str,
    pub arities: &'static [usize],
    pub mutates: bool,
    handler: OperationHandler,
}

impl OperationEntry {
    fn v1(
        name: &'static str,
        arities: &'static [usize],
        mutates: bool,
        handler: OperationHandler,
    ) -> Self {
        Self {
            name,
            arities,
            mutates,
            handler,
        }
    }

    fn expected_arity(&self) -> String {
        self.arities
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

impl std::fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationEntry")
            .field("name", &self.name)
            .field("arities", &self.arities)
            .field("mutates", &self.mutates)
            .finish_non_exhaustive()
    }
}

/// Operation name to handler, fixed once the dispatcher is built.
#[derive(Debug, Clone)]
pub struct OperationTable {
    entries: BTreeMap<&'static str, OperationEntry>,
}

impl OperationTable {
    pub fn build(entries: Vec<OperationEntry>) -> Result<Self, ContractViolation> {
        let mut table = BTreeMap::new();
        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "operation_table.name",
                    reason: "must not be empty",
                });
            }
            if entry.arities.is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "operation_table.arities",
                    reason: "must list at least one accepted argument count",
                });
            }
            if table.insert(entry.name, entry).is_some() {
                return Err(ContractViolation::InvalidValue {
                    field: "operation_table.name",
                    reason: "duplicate operation name",
                });
            }
        }
        Ok(Self { entries: table })
    }

    /// The operations exposed under one EHR schema.
    pub fn for_schema(schema: EhrSchema) -> Result<Self, ContractViolation> {
        use operation_names::*;

        let mut entries = vec![
            OperationEntry::v1(CREATE_PATIENT, &[2, 6], true, create_patient),
            OperationEntry::v1(GET_PATIENT, &[1], false, read_record),
            OperationEntry::v1(VIEW_DETAILS, &[1], false, read_record),
            OperationEntry::v1(VIEW_PATIENT_DETAILS, &[1], false, read_record),
            OperationEntry::v1(GET_EHR, &[1], false, read_record),
        ];
        match schema {
            EhrSchema::Clinical => entries.extend([
                OperationEntry::v1(CREATE_EHR, &[6], true, create_clinical_ehr),
                OperationEntry::v1(GET_PATIENT_DETAILS, &[6], true, create_clinical_ehr),
                OperationEntry::v1(UPDATE_FILE_UPLOADS, &[3], true, append_file_upload),
                OperationEntry::v1(UPDATE_EHR, &[3], true, append_ehr_upload),
            ]),
            EhrSchema::Visit => entries.extend([
                OperationEntry::v1(CREATE_EHR, &[4], true, create_visit_ehr),
                OperationEntry::v1(UPDATE_EHR, &[3], true, append_appointment),
            ]),
        }
        Self::build(entries)
    }

    pub fn get(&self, name: &str) -> Option<&OperationEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Routes a named operation with positional string arguments to the record engine.
///
/// Every invocation runs inside the transaction it is handed; committing is the caller's job.
#[derive(Debug, Clone)]
pub struct RecordDispatcher {
    engine: RecordEngine,
    table: OperationTable,
}

impl RecordDispatcher {
    pub fn new(engine: RecordEngine) -> Result<Self, ContractViolation> {
        let table = OperationTable::for_schema(engine.schema())?;
        Ok(Self { engine, table })
    }

    pub fn engine(&self) -> &RecordEngine {
        &self.engine
    }

    pub fn init(&self, ctx: &mut dyn TransactionContext) -> Result<(), RecordError> {
        self.engine.init(ctx, INIT_FUNCTION)
    }

    pub fn is_mutating(&self, operation: &str) -> bool {
        self.table.get(operation).is_some_and(|entry| entry.mutates)
    }

    pub fn invoke(
        &self,
        ctx: &mut dyn TransactionContext,
        operation: &str,
        args: &[String],
    ) -> Result<OperationOutput, RecordError> {
        let entry = self
            .table
            .get(operation)
            .ok_or_else(|| RecordError::UnknownOperation(operation.to_string()))?;
        if !entry.arities.contains(&args.len()) {
            return Err(RecordError::arity(
                operation,
                &entry.expected_arity(),
                args.len(),
            ));
        }
        info!(
            operation,
            tx_id = %ctx.tx_id(),
            mutates = entry.mutates,
            "dispatching operation"
        );
        (entry.handler)(&self.engine, ctx, args)
    }
}

fn create_patient(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let input = match args {
        [name, contact_no] => PatientCreateInput::basic_v1(name, contact_no)?,
        [first, last, contact_no, gender, birthday, address] => {
            PatientCreateInput::intake_v1(first, last, contact_no, gender, birthday, address)?
        }
        _ => return Err(RecordError::arity("createPatient", "2 or 6", args.len())),
    };
    engine
        .create_patient(ctx, input)
        .map(OperationOutput::RecordId)
}

fn read_record(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [id] = args else {
        return Err(RecordError::arity("read", "1", args.len()));
    };
    let id = RecordId::new(id.as_str())?;
    engine.read_record(ctx, &id).map(OperationOutput::Document)
}

fn create_clinical_ehr(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [first, last, contact_no, gender, birthday, address] = args else {
        return Err(RecordError::arity(operation_names::CREATE_EHR, "6", args.len()));
    };
    let input = EhrCreateInput::clinical_v1(first, last, contact_no, gender, birthday, address)?;
    engine.create_ehr(ctx, input).map(OperationOutput::RecordId)
}

fn create_visit_ehr(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [first, last, ssn, birthday] = args else {
        return Err(RecordError::arity(operation_names::CREATE_EHR, "4", args.len()));
    };
    let input = EhrCreateInput::visit_v1(first, last, ssn, birthday)?;
    engine.create_ehr(ctx, input).map(OperationOutput::RecordId)
}

fn append_file_upload(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [id, content_hash, file_info] = args else {
        return Err(RecordError::arity(
            operation_names::UPDATE_FILE_UPLOADS,
            "3",
            args.len(),
        ));
    };
    let id = RecordId::new(id.as_str())?;
    let input = SubRecordInput::file_upload_v1(content_hash, file_info)?;
    engine.append(ctx, &id, input).map(OperationOutput::Document)
}

fn append_ehr_upload(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [id, source_tx_id, prescription_info] = args else {
        return Err(RecordError::arity(operation_names::UPDATE_EHR, "3", args.len()));
    };
    let id = RecordId::new(id.as_str())?;
    let input = SubRecordInput::ehr_upload_v1(source_tx_id, prescription_info)?;
    engine.append(ctx, &id, input).map(OperationOutput::Document)
}

fn append_appointment(
    engine: &RecordEngine,
    ctx: &mut dyn TransactionContext,
    args: &[String],
) -> Result<OperationOutput, RecordError> {
    let [id, doctor_id, comment] = args else {
        return Err(RecordError::arity(operation_names::UPDATE_EHR, "3", args.len()));
    };
    let id = RecordId::new(id.as_str())?;
    let input = SubRecordInput::appointment_v1(doctor_id, comment)?;
    engine.append(ctx, &id, input).map(OperationOutput::Document)
}

#[cfg(test)]
mod tests {
    use super::operation_names::*;
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use ehr_engines::record_engine::RecordEngineConfig;
    use ehr_kernel_contracts::RecordErrorKind;
    use ehr_storage::ledger::{
        FixedLedgerClock, InMemoryLedger, SequentialTxIdSource, StateStore, CHANGE_EVENT_NAME,
    };

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::with_sources(
            Arc::new(FixedLedgerClock(
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 42, 37).unwrap(),
            )),
            Arc::new(SequentialTxIdSource::new("T")),
        )
    }

    fn dispatcher(schema: EhrSchema) -> RecordDispatcher {
        let engine = RecordEngine::new(RecordEngineConfig::mvp_v1(schema)).unwrap();
        RecordDispatcher::new(engine).unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn invoke(
        l: &InMemoryLedger,
        d: &RecordDispatcher,
        op: &str,
        values: &[&str],
    ) -> Result<OperationOutput, RecordError> {
        l.execute(|tx| d.invoke(tx, op, &args(values)))
            .map(|c| c.value)
    }

    #[test]
    fn at_dispatch_01_create_then_view_patient() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let created = invoke(&l, &d, CREATE_PATIENT, &["Alice", "555-0100"]).unwrap();
        assert_eq!(created.into_payload(), b"T1".to_vec());

        let viewed = invoke(&l, &d, VIEW_DETAILS, &["T1"]).unwrap();
        assert_eq!(
            viewed.into_payload(),
            br#"{"id":"T1","name":"Alice","contactNo":"555-0100"}"#.to_vec()
        );
        let legacy = invoke(&l, &d, VIEW_PATIENT_DETAILS, &["T1"]).unwrap();
        assert_eq!(legacy, invoke(&l, &d, GET_PATIENT, &["T1"]).unwrap());
    }

    #[test]
    fn at_dispatch_02_intake_patient_keeps_demographics() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let out = invoke(
            &l,
            &d,
            CREATE_PATIENT,
            &["Ann", "Lee", "555-0199", "F", "1990-03-04", "9 Elm St"],
        )
        .unwrap();
        let OperationOutput::RecordId(id) = out else {
            panic!("expected a record id");
        };
        let doc: serde_json::Value =
            serde_json::from_slice(&l.committed_value(id.as_str()).unwrap().unwrap()).unwrap();
        assert_eq!(doc["name"], "Ann Lee");
        assert_eq!(doc["demographics"]["birthday"], "1990-03-04");
        assert_eq!(doc["demographics"]["address"], "9 Elm St");
    }

    #[test]
    fn at_dispatch_10_get_patient_details_writes_clinical_ehr_that_accepts_uploads() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let out = invoke(
            &l,
            &d,
            GET_PATIENT_DETAILS,
            &["Ann", "Lee", "555-0199", "F", "1990-03-04", "9 Elm St"],
        )
        .unwrap();
        let OperationOutput::RecordId(id) = out else {
            panic!("expected a record id");
        };
        let doc = invoke(&l, &d, UPDATE_FILE_UPLOADS, &[id.as_str(), "QmA", "x-ray"])
            .unwrap()
            .into_payload();
        let doc: serde_json::Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(doc["firstname"], "Ann");
        assert_eq!(doc["contactNum"], "555-0199");
        assert_eq!(doc["fuploads"][0]["ifhash"], "QmA");
        assert!(doc.get("demographics").is_none());

        let visit = dispatcher(EhrSchema::Visit);
        let err = invoke(
            &l,
            &visit,
            GET_PATIENT_DETAILS,
            &["Ann", "Lee", "555-0199", "F", "1990-03-04", "9 Elm St"],
        )
        .unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::UnknownOperation);
    }

    #[test]
    fn at_dispatch_11_legacy_document_accepts_append_and_corrupt_read_fails() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let legacy = br#"{"id":"T9","firstname":"Ann","lastname":"Lee","contactNum":"555","gender":"F","birthday":"1990-03-04T00:00:00Z","address":"9 Elm","fuploads":null,"ehruploads":null}"#;
        l.execute(|tx| tx.put_state("T9", legacy.to_vec())).unwrap();
        l.execute(|tx| tx.put_state("T77", b"\x00garbage".to_vec()))
            .unwrap();

        let doc = invoke(&l, &d, UPDATE_FILE_UPLOADS, &["T9", "QmA", "x-ray"])
            .unwrap()
            .into_payload();
        let doc: serde_json::Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(doc["birthday"], "1990-03-04");
        assert_eq!(doc["fuploads"].as_array().unwrap().len(), 1);

        let err = invoke(&l, &d, GET_EHR, &["T77"]).unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::EncodingError);
    }

    #[test]
    fn at_dispatch_03_visit_schema_appointment_scenario() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Visit);
        l.execute(|tx| d.init(tx)).unwrap();

        let created = invoke(&l, &d, CREATE_EHR, &["Jane", "Doe", "SSN123", "2020-01-01"]).unwrap();
        assert_eq!(
            created,
            OperationOutput::RecordId(RecordId::new("T2").unwrap())
        );
        let doc = invoke(&l, &d, UPDATE_EHR, &["T2", "DrBob", "follow-up"])
            .unwrap()
            .into_payload();
        let doc: serde_json::Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(doc["visits"].as_array().unwrap().len(), 1);
        assert_eq!(doc["visits"][0]["drId"], "DrBob");
        assert_eq!(doc["visits"][0]["comment"], "follow-up");
        assert_eq!(doc["visits"][0]["date"], "2024-05-01T10:42:00Z");
    }

    #[test]
    fn at_dispatch_04_impossible_birthday_is_parse_error_and_writes_nothing() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let err = invoke(
            &l,
            &d,
            CREATE_EHR,
            &["Jane", "Doe", "555-0101", "F", "2024-02-30", "1 Main St"],
        )
        .unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::ParseError);
        assert_eq!(l.key_count().unwrap(), 0);
        assert!(l.committed_events().unwrap().is_empty());
    }

    #[test]
    fn at_dispatch_05_append_to_missing_id_is_not_found() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        let err = invoke(&l, &d, UPDATE_FILE_UPLOADS, &["T404", "QmA", "x-ray"]).unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::NotFound);
        assert_eq!(l.key_count().unwrap(), 0);
    }

    #[test]
    fn at_dispatch_06_unknown_and_schema_foreign_operations_are_rejected() {
        let l = ledger();
        let clinical = dispatcher(EhrSchema::Clinical);
        let err = invoke(&l, &clinical, "deletePatient", &["T1"]).unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::UnknownOperation);

        let visit = dispatcher(EhrSchema::Visit);
        let err = invoke(&l, &visit, UPDATE_FILE_UPLOADS, &["T1", "QmA", "x-ray"]).unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::UnknownOperation);
    }

    #[test]
    fn at_dispatch_07_wrong_arity_is_rejected_before_state_is_touched() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        for (op, values) in [
            (CREATE_PATIENT, &["Alice"][..]),
            (CREATE_PATIENT, &["a", "b", "c"][..]),
            (CREATE_EHR, &["Jane", "Doe", "SSN123", "2020-01-01"][..]),
            (GET_EHR, &[][..]),
            (UPDATE_EHR, &["T1", "T0"][..]),
        ] {
            let err = invoke(&l, &d, op, values).unwrap_err();
            assert_eq!(err.kind(), RecordErrorKind::InvalidArgument, "{op}");
        }
        assert_eq!(l.key_count().unwrap(), 0);
    }

    #[test]
    fn at_dispatch_08_mutating_operations_emit_one_change_event() {
        let l = ledger();
        let d = dispatcher(EhrSchema::Clinical);
        invoke(
            &l,
            &d,
            CREATE_EHR,
            &["Jane", "Doe", "555-0101", "F", "2020-01-01", "1 Main St"],
        )
        .unwrap();
        invoke(&l, &d, UPDATE_EHR, &["T1", "T0", "ibuprofen 200mg"]).unwrap();
        invoke(&l, &d, GET_EHR, &["T1"]).unwrap();

        let events = l.committed_events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.name == CHANGE_EVENT_NAME && e.payload.is_empty()));
        assert!(d.is_mutating(UPDATE_EHR));
        assert!(!d.is_mutating(GET_EHR));
        assert!(!d.is_mutating("deletePatient"));
    }

    #[test]
    fn at_dispatch_09_table_rejects_duplicate_names() {
        let dup = vec![
            OperationEntry::v1(GET_EHR, &[1], false, read_record),
            OperationEntry::v1(GET_EHR, &[1], false, read_record),
        ];
        assert!(OperationTable::build(dup).is_err());

        let no_arity = vec![OperationEntry::v1(GET_EHR, &[], false, read_record)];
        assert!(OperationTable::build(no_arity).is_err());

        let clinical = OperationTable::for_schema(EhrSchema::Clinical).unwrap();
        let visit = OperationTable::for_schema(EhrSchema::Visit).unwrap();
        assert_eq!(clinical.len(), visit.len() + 2);
        assert!(!visit.names().any(|n| n == UPDATE_FILE_UPLOADS));
    }
}
