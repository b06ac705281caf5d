#![forbid(unsafe_code)]

use std::env;

use ehr_engines::record_engine::{RecordEngine, RecordEngineConfig};
use ehr_kernel_contracts::ehr::EhrSchema;
use ehr_kernel_contracts::{RecordError, RecordErrorKind, RecordId};
use ehr_os::dispatch::{operation_names, OperationOutput, RecordDispatcher};
use ehr_os::retry::{invoke_with_conflict_retry, RetryPolicy};
use ehr_storage::ledger::InMemoryLedger;
use serde_json::value::RawValue;
use tracing::{info, warn};

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:3000";

pub mod outcomes {
    pub const COMMITTED: &str = "COMMITTED";
    pub const READ: &str = "READ";
    pub const REJECTED: &str = "REJECTED";
    pub const NOT_SUBMITTED: &str = "NOT_SUBMITTED";
    pub const HEALTHY: &str = "HEALTHY";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: String,
    pub schema: EhrSchema,
    pub retry: RetryPolicy,
    pub log_json: bool,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            bind: DEFAULT_HTTP_BIND.to_string(),
            schema: EhrSchema::Clinical,
            retry: RetryPolicy::mvp_v1(),
            log_json: false,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Unparseable or out-of-range values fall back to the `mvp_v1` defaults.
    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::mvp_v1();
        let bind = lookup("EHR_HTTP_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.bind);
        let schema = lookup("EHR_SCHEMA")
            .and_then(|v| v.parse::<EhrSchema>().ok())
            .unwrap_or(defaults.schema);
        let retry = lookup("EHR_CONFLICT_RETRY_ATTEMPTS")
            .and_then(|v| v.trim().parse::<u8>().ok())
            .and_then(|n| RetryPolicy::new(n).ok())
            .unwrap_or(defaults.retry);
        let log_json = match lookup("EHR_LOG_JSON") {
            Some(v) => matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            ),
            None => defaults.log_json,
        };
        Self {
            bind,
            schema,
            retry,
            log_json,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperationAdapterRequest {
    pub operation: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperationAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub error_kind: Option<String>,
    pub transaction_id: Option<String>,
    pub record_id: Option<String>,
    /// Stored document embedded verbatim.
    pub document: Option<Box<RawValue>>,
}

impl OperationAdapterResponse {
    fn ok(outcome: &str) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason: None,
            error_kind: None,
            transaction_id: None,
            record_id: None,
            document: None,
        }
    }

    pub fn rejected(err: &RecordError) -> Self {
        Self {
            status: "error".to_string(),
            outcome: outcomes::REJECTED.to_string(),
            reason: Some(err.to_string()),
            error_kind: Some(err.kind().as_str().to_string()),
            transaction_id: None,
            record_id: None,
            document: None,
        }
    }

    pub fn not_submitted(operation: &str) -> Self {
        let mut response = Self::ok(outcomes::NOT_SUBMITTED);
        response.reason = Some(format!("{operation}: form was not submitted"));
        response
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub schema: String,
    pub committed_keys: usize,
}

/// HTTP status for a rejected operation.
pub fn status_code_for(kind: RecordErrorKind) -> u16 {
    match kind {
        RecordErrorKind::InvalidArgument
        | RecordErrorKind::ParseError
        | RecordErrorKind::UnknownOperation => 400,
        RecordErrorKind::NotFound => 404,
        RecordErrorKind::Conflict => 409,
        RecordErrorKind::EncodingError | RecordErrorKind::StorageError => 500,
    }
}

/// An HTML form that maps onto one dispatcher operation.
pub trait OperationForm {
    const OPERATION: &'static str;

    fn is_submitted(&self) -> bool;

    /// Positional arguments for the operation under the given schema.
    fn into_args(self, schema: EhrSchema) -> Result<Vec<String>, RecordError>;
}

fn submitted_flag(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some("true")
}

fn required(field: &'static str, value: Option<String>) -> Result<String, RecordError> {
    value.ok_or_else(|| RecordError::InvalidArgument(format!("form field {field} is required")))
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientForm {
    pub submitted: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact_no: Option<String>,
    pub gender: Option<String>,
    pub birthday: Option<String>,
    pub address: Option<String>,
}

impl OperationForm for CreatePatientForm {
    const OPERATION: &'static str = operation_names::CREATE_PATIENT;

    fn is_submitted(&self) -> bool {
        submitted_flag(&self.submitted)
    }

    fn into_args(self, _schema: EhrSchema) -> Result<Vec<String>, RecordError> {
        if self.first_name.is_none() && self.name.is_some() {
            return Ok(vec![
                required("name", self.name)?,
                required("contactNo", self.contact_no)?,
            ]);
        }
        Ok(vec![
            required("firstName", self.first_name)?,
            required("lastName", self.last_name)?,
            required("contactNo", self.contact_no)?,
            required("gender", self.gender)?,
            required("birthday", self.birthday)?,
            required("address", self.address)?,
        ])
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEhrForm {
    pub submitted: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact_no: Option<String>,
    pub gender: Option<String>,
    pub birthday: Option<String>,
    pub address: Option<String>,
    pub ssn: Option<String>,
}

impl OperationForm for CreateEhrForm {
    const OPERATION: &'static str = operation_names::CREATE_EHR;

    fn is_submitted(&self) -> bool {
        submitted_flag(&self.submitted)
    }

    fn into_args(self, schema: EhrSchema) -> Result<Vec<String>, RecordError> {
        match schema {
            EhrSchema::Clinical => Ok(vec![
                required("firstName", self.first_name)?,
                required("lastName", self.last_name)?,
                required("contactNo", self.contact_no)?,
                required("gender", self.gender)?,
                required("birthday", self.birthday)?,
                required("address", self.address)?,
            ]),
            EhrSchema::Visit => Ok(vec![
                required("firstName", self.first_name)?,
                required("lastName", self.last_name)?,
                required("ssn", self.ssn)?,
                required("birthday", self.birthday)?,
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GetEhrForm {
    pub submitted: Option<String>,
    pub id: Option<String>,
}

impl OperationForm for GetEhrForm {
    const OPERATION: &'static str = operation_names::GET_EHR;

    fn is_submitted(&self) -> bool {
        submitted_flag(&self.submitted)
    }

    fn into_args(self, _schema: EhrSchema) -> Result<Vec<String>, RecordError> {
        Ok(vec![required("id", self.id)?])
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEhrForm {
    pub submitted: Option<String>,
    pub id: Option<String>,
    pub source_transaction_id: Option<String>,
    pub prescription: Option<String>,
    pub doctor_id: Option<String>,
    pub comment: Option<String>,
}

impl OperationForm for UpdateEhrForm {
    const OPERATION: &'static str = operation_names::UPDATE_EHR;

    fn is_submitted(&self) -> bool {
        submitted_flag(&self.submitted)
    }

    fn into_args(self, schema: EhrSchema) -> Result<Vec<String>, RecordError> {
        let id = required("id", self.id)?;
        match schema {
            EhrSchema::Clinical => Ok(vec![
                id,
                required("sourceTransactionId", self.source_transaction_id)?,
                required("prescription", self.prescription)?,
            ]),
            EhrSchema::Visit => Ok(vec![
                id,
                required("doctorId", self.doctor_id)?,
                required("comment", self.comment)?,
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FileUploadForm {
    pub submitted: Option<String>,
    pub id: Option<String>,
    pub hash: Option<String>,
    pub info: Option<String>,
}

impl OperationForm for FileUploadForm {
    const OPERATION: &'static str = operation_names::UPDATE_FILE_UPLOADS;

    fn is_submitted(&self) -> bool {
        submitted_flag(&self.submitted)
    }

    fn into_args(self, _schema: EhrSchema) -> Result<Vec<String>, RecordError> {
        Ok(vec![
            required("id", self.id)?,
            required("hash", self.hash)?,
            required("info", self.info)?,
        ])
    }
}

/// Owns the ledger and dispatcher behind the HTTP front-end.
///
/// Mutating operations are committed through the conflict-retry loop. Reads run in a
/// transaction that is never committed.
#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    ledger: InMemoryLedger,
    dispatcher: RecordDispatcher,
    retry: RetryPolicy,
}

impl AdapterRuntime {
    /// Builds the dispatcher and runs `init` once against the ledger.
    pub fn new(
        ledger: InMemoryLedger,
        schema: EhrSchema,
        retry: RetryPolicy,
    ) -> Result<Self, RecordError> {
        let engine = RecordEngine::new(RecordEngineConfig::mvp_v1(schema))?;
        let dispatcher = RecordDispatcher::new(engine)?;
        let committed = ledger.execute(|tx| dispatcher.init(tx))?;
        info!(
            schema = %schema,
            tx_id = %committed.tx_id,
            max_attempts = retry.max_attempts,
            "ledger initialised"
        );
        Ok(Self {
            ledger,
            dispatcher,
            retry,
        })
    }

    pub fn from_config(config: &AdapterConfig) -> Result<Self, RecordError> {
        Self::new(InMemoryLedger::new(), config.schema, config.retry)
    }

    pub fn default_from_env() -> Result<Self, RecordError> {
        Self::from_config(&AdapterConfig::from_env())
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    pub fn schema(&self) -> EhrSchema {
        self.dispatcher.engine().schema()
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, RecordError> {
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: outcomes::HEALTHY.to_string(),
            reason: None,
            schema: self.schema().to_string(),
            committed_keys: self.ledger.key_count()?,
        })
    }

    pub fn run_operation(
        &self,
        request: OperationAdapterRequest,
    ) -> Result<OperationAdapterResponse, RecordError> {
        let operation = request.operation.trim();
        let result = if self.dispatcher.is_mutating(operation) {
            invoke_with_conflict_retry(
                &self.ledger,
                &self.dispatcher,
                operation,
                &request.args,
                self.retry,
            )
            .and_then(|committed| {
                response_from_output(outcomes::COMMITTED, Some(committed.tx_id), committed.value)
            })
        } else {
            let mut tx = self.ledger.begin()?;
            self.dispatcher
                .invoke(&mut tx, operation, &request.args)
                .and_then(|output| response_from_output(outcomes::READ, None, output))
        };
        if let Err(err) = &result {
            warn!(operation, kind = err.kind().as_str(), error = %err, "operation rejected");
        }
        result
    }

    pub fn run_form<F: OperationForm>(
        &self,
        form: F,
    ) -> Result<OperationAdapterResponse, RecordError> {
        if !form.is_submitted() {
            return Ok(OperationAdapterResponse::not_submitted(F::OPERATION));
        }
        let args = form.into_args(self.schema())?;
        self.run_operation(OperationAdapterRequest {
            operation: F::OPERATION.to_string(),
            args,
        })
    }
}

fn response_from_output(
    outcome: &str,
    tx_id: Option<RecordId>,
    output: OperationOutput,
) -> Result<OperationAdapterResponse, RecordError> {
    let mut response = OperationAdapterResponse::ok(outcome);
    response.transaction_id = tx_id.map(|id| id.to_string());
    match output {
        OperationOutput::RecordId(id) => response.record_id = Some(id.to_string()),
        OperationOutput::Document(bytes) => {
            let text = String::from_utf8(bytes).map_err(|e| {
                RecordError::EncodingError(format!("stored document is not UTF-8: {e}"))
            })?;
            let raw = RawValue::from_string(text).map_err(|e| {
                RecordError::EncodingError(format!("stored document is not JSON: {e}"))
            })?;
            response.document = Some(raw);
        }
    }
    Ok(response)
}
