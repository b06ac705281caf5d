#![forbid(unsafe_code)]

use ehr_kernel_contracts::ehr::{
    ClinicalEhr, EhrCreateInput, EhrRecord, EhrSchema, SubRecordInput, VisitEhr,
};
use ehr_kernel_contracts::patient::{Patient, PatientCreateInput};
use ehr_kernel_contracts::{
    CalendarDate, ContractViolation, MinuteTimestamp, RecordError, RecordId, Validate,
};
use ehr_storage::ledger::{TransactionContext, CHANGE_EVENT_NAME};
use ehr_storage::repo::RecordRepo;
use tracing::{debug, info};

/// The only function name accepted at instantiation.
pub const INIT_FUNCTION: &str = "init";
/// Fixed key of the placeholder document written at instantiation.
pub const BOOTSTRAP_KEY: &str = "hello";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEngineConfig {
    pub schema: EhrSchema,
    pub bootstrap_key: String,
}

impl RecordEngineConfig {
    pub fn mvp_v1(schema: EhrSchema) -> Self {
        Self {
            schema,
            bootstrap_key: BOOTSTRAP_KEY.to_string(),
        }
    }
}

/// Create / read / append state machine for patient and EHR documents.
///
/// Holds no state between calls. Every operation performs all validation and reads first and
/// at most one terminal write, so a failure never leaves a partial document behind.
///
/// Appends are an unconditioned read-modify-write. Two transactions appending to the same
/// record concurrently are only kept apart by the platform's commit-time read-set check; the
/// loser gets `RecordError::Conflict` and must rerun the whole operation.
#[derive(Debug, Clone)]
pub struct RecordEngine {
    config: RecordEngineConfig,
}

impl RecordEngine {
    pub fn new(config: RecordEngineConfig) -> Result<Self, ContractViolation> {
        RecordId::new(config.bootstrap_key.clone())?;
        Ok(Self { config })
    }

    pub fn schema(&self) -> EhrSchema {
        self.config.schema
    }

    pub fn init(&self, ctx: &mut dyn TransactionContext, function: &str) -> Result<(), RecordError> {
        if function != INIT_FUNCTION {
            return Err(RecordError::UnknownOperation(format!(
                "{function}: instantiation only accepts {INIT_FUNCTION}"
            )));
        }
        let key = RecordId::new(self.config.bootstrap_key.clone())?;
        let today = CalendarDate::from_naive(ctx.tx_timestamp().date_naive());
        match self.config.schema {
            EhrSchema::Clinical => {
                ctx.store_record(&key, &ClinicalEhr::bootstrap_placeholder(key.clone(), today))?
            }
            EhrSchema::Visit => {
                ctx.store_record(&key, &VisitEhr::bootstrap_placeholder(key.clone(), today))?
            }
        };
        info!(key = %key, schema = %self.config.schema, "bootstrap placeholder written");
        Ok(())
    }

    pub fn create_patient(
        &self,
        ctx: &mut dyn TransactionContext,
        input: PatientCreateInput,
    ) -> Result<RecordId, RecordError> {
        input.validate()?;
        let id = ctx.tx_id().clone();
        let patient = Patient::from_input_v1(id.clone(), input)?;
        ctx.store_record(&id, &patient)?;
        notify_change(ctx)?;
        debug!(record_id = %id, "patient created");
        Ok(id)
    }

    pub fn create_ehr(
        &self,
        ctx: &mut dyn TransactionContext,
        input: EhrCreateInput,
    ) -> Result<RecordId, RecordError> {
        input.validate()?;
        if input.schema() != self.config.schema {
            return Err(RecordError::InvalidArgument(format!(
                "{} EHR input does not match the configured {} schema",
                input.schema(),
                self.config.schema
            )));
        }
        match self.config.schema {
            EhrSchema::Clinical => create_ehr_as::<ClinicalEhr>(ctx, input),
            EhrSchema::Visit => create_ehr_as::<VisitEhr>(ctx, input),
        }
    }

    /// Stored bytes, byte-for-byte as last written. Bytes that are no longer a JSON document
    /// are an `EncodingError`.
    pub fn read_record(
        &self,
        ctx: &mut dyn TransactionContext,
        id: &RecordId,
    ) -> Result<Vec<u8>, RecordError> {
        ctx.load_document(id)
    }

    /// Appends one sub-record and returns the full re-serialized document.
    pub fn append(
        &self,
        ctx: &mut dyn TransactionContext,
        id: &RecordId,
        input: SubRecordInput,
    ) -> Result<Vec<u8>, RecordError> {
        input.validate()?;
        if !schema_accepts(self.config.schema, &input) {
            return Err(RecordError::InvalidArgument(format!(
                "the {} EHR schema has no history for this sub-record",
                self.config.schema
            )));
        }
        match self.config.schema {
            EhrSchema::Clinical => append_as::<ClinicalEhr>(ctx, id, input),
            EhrSchema::Visit => append_as::<VisitEhr>(ctx, id, input),
        }
    }
}

fn schema_accepts(schema: EhrSchema, input: &SubRecordInput) -> bool {
    matches!(
        (schema, input),
        (EhrSchema::Clinical, SubRecordInput::FileUpload { .. })
            | (EhrSchema::Clinical, SubRecordInput::EhrUpload { .. })
            | (EhrSchema::Visit, SubRecordInput::Appointment { .. })
    )
}

fn create_ehr_as<R: EhrRecord>(
    ctx: &mut dyn TransactionContext,
    input: EhrCreateInput,
) -> Result<RecordId, RecordError> {
    let id = ctx.tx_id().clone();
    let record = R::from_input_v1(id.clone(), input)?;
    ctx.store_record(&id, &record)?;
    notify_change(ctx)?;
    debug!(record_id = %id, schema = %R::SCHEMA, "ehr created");
    Ok(id)
}

fn append_as<R: EhrRecord>(
    ctx: &mut dyn TransactionContext,
    id: &RecordId,
    input: SubRecordInput,
) -> Result<Vec<u8>, RecordError> {
    let current: R = ctx.load_record(id)?;
    if current.id() != id {
        return Err(RecordError::EncodingError(format!(
            "record stored under {id} carries id {}",
            current.id()
        )));
    }
    let entry = input.stamp(MinuteTimestamp::truncate(ctx.tx_timestamp()));
    let kind = entry.kind_name();
    let next = current.appended(entry)?;
    let history_len = next.history_len();
    let bytes = ctx.store_record(id, &next)?;
    notify_change(ctx)?;
    debug!(
        record_id = %id,
        tx_id = %ctx.tx_id(),
        kind,
        history_len,
        "sub-record appended"
    );
    Ok(bytes)
}

fn notify_change(ctx: &mut dyn TransactionContext) -> Result<(), RecordError> {
    ctx.set_event(CHANGE_EVENT_NAME, Vec::new())
}
