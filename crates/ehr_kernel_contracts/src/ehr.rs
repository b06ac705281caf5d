#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{null_as_empty, validate_required};
use crate::{CalendarDate, ContractViolation, MinuteTimestamp, RecordId, Validate};

/// Which EHR document shape a running engine reads and writes.
///
/// The two shapes have conflicting field sets; a ledger only ever holds one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EhrSchema {
    /// Demographics plus file uploads and cross-record EHR uploads.
    Clinical,
    /// SSN-keyed record with an appointment history.
    Visit,
}

impl EhrSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            EhrSchema::Clinical => "clinical",
            EhrSchema::Visit => "visit",
        }
    }
}

impl fmt::Display for EhrSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EhrSchema {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clinical" => Ok(EhrSchema::Clinical),
            "visit" => Ok(EhrSchema::Visit),
            _ => Err(ContractViolation::InvalidFormat {
                field: "ehr_schema",
                expected: "one of clinical, visit",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    #[serde(rename = "ifhash")]
    pub content_hash: String,
    #[serde(rename = "udate")]
    pub uploaded_at: MinuteTimestamp,
    #[serde(rename = "finfo")]
    pub file_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EhrUpload {
    /// Lookup key of a related EHR. Not an ownership link.
    #[serde(rename = "ehrtid")]
    pub source_transaction_id: RecordId,
    #[serde(rename = "dtime")]
    pub diagnosis_time: MinuteTimestamp,
    #[serde(rename = "pinfo")]
    pub prescription_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(rename = "drId")]
    pub doctor_id: String,
    pub date: MinuteTimestamp,
    pub comment: String,
}

/// A timestamped history entry ready to be appended to an EHR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubRecord {
    FileUpload(FileUpload),
    EhrUpload(EhrUpload),
    Appointment(Appointment),
}

impl SubRecord {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SubRecord::FileUpload(_) => "file_upload",
            SubRecord::EhrUpload(_) => "ehr_upload",
            SubRecord::Appointment(_) => "appointment",
        }
    }
}

/// Caller-supplied fields of a sub-record; the timestamp is assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubRecordInput {
    FileUpload {
        content_hash: String,
        file_info: String,
    },
    EhrUpload {
        source_transaction_id: RecordId,
        prescription_info: String,
    },
    Appointment {
        doctor_id: String,
        comment: String,
    },
}

impl SubRecordInput {
    pub fn file_upload_v1(content_hash: &str, file_info: &str) -> Result<Self, ContractViolation> {
        let input = Self::FileUpload {
            content_hash: content_hash.to_string(),
            file_info: file_info.to_string(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn ehr_upload_v1(
        source_transaction_id: &str,
        prescription_info: &str,
    ) -> Result<Self, ContractViolation> {
        validate_required("sub_record_input.source_transaction_id", source_transaction_id)?;
        let input = Self::EhrUpload {
            source_transaction_id: RecordId::new(source_transaction_id)?,
            prescription_info: prescription_info.to_string(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn appointment_v1(doctor_id: &str, comment: &str) -> Result<Self, ContractViolation> {
        let input = Self::Appointment {
            doctor_id: doctor_id.to_string(),
            comment: comment.to_string(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn stamp(self, at: MinuteTimestamp) -> SubRecord {
        match self {
            SubRecordInput::FileUpload {
                content_hash,
                file_info,
            } => SubRecord::FileUpload(FileUpload {
                content_hash,
                uploaded_at: at,
                file_info,
            }),
            SubRecordInput::EhrUpload {
                source_transaction_id,
                prescription_info,
            } => SubRecord::EhrUpload(EhrUpload {
                source_transaction_id,
                diagnosis_time: at,
                prescription_info,
            }),
            SubRecordInput::Appointment { doctor_id, comment } => {
                SubRecord::Appointment(Appointment {
                    doctor_id,
                    date: at,
                    comment,
                })
            }
        }
    }
}

impl Validate for SubRecordInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            SubRecordInput::FileUpload {
                content_hash,
                file_info,
            } => {
                validate_required("file_upload.content_hash", content_hash)?;
                validate_required("file_upload.file_info", file_info)
            }
            SubRecordInput::EhrUpload {
                source_transaction_id,
                prescription_info,
            } => {
                source_transaction_id.validate()?;
                validate_required("ehr_upload.prescription_info", prescription_info)
            }
            SubRecordInput::Appointment { doctor_id, comment } => {
                validate_required("appointment.doctor_id", doctor_id)?;
                validate_required("appointment.comment", comment)
            }
        }
    }
}

/// Capability shared by both EHR shapes: grow the history at its tail.
///
/// Appending consumes the record and returns the replacement value; nothing holds a mutable
/// handle to a stored document across operations.
pub trait Appendable: Sized {
    fn appended(self, entry: SubRecord) -> Result<Self, ContractViolation>;

    fn history_len(&self) -> usize;
}

/// A storable EHR document shape.
pub trait EhrRecord: Appendable + Validate + Serialize + DeserializeOwned {
    const SCHEMA: EhrSchema;

    fn from_input_v1(id: RecordId, input: EhrCreateInput) -> Result<Self, ContractViolation>;

    fn id(&self) -> &RecordId;

    /// Document written under the bootstrap key at instantiation.
    fn bootstrap_placeholder(id: RecordId, today: CalendarDate) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalEhr {
    pub id: RecordId,
    pub firstname: String,
    pub lastname: String,
    #[serde(rename = "contactNum")]
    pub contact_no: String,
    pub gender: String,
    pub birthday: CalendarDate,
    pub address: String,
    #[serde(rename = "fuploads", default, deserialize_with = "null_as_empty")]
    pub file_uploads: Vec<FileUpload>,
    #[serde(rename = "ehruploads", default, deserialize_with = "null_as_empty")]
    pub ehr_uploads: Vec<EhrUpload>,
}

impl Appendable for ClinicalEhr {
    fn appended(mut self, entry: SubRecord) -> Result<Self, ContractViolation> {
        match entry {
            SubRecord::FileUpload(u) => self.file_uploads.push(u),
            SubRecord::EhrUpload(u) => self.ehr_uploads.push(u),
            SubRecord::Appointment(_) => {
                return Err(ContractViolation::InvalidValue {
                    field: "sub_record",
                    reason: "appointments are not part of the clinical EHR schema",
                })
            }
        }
        Ok(self)
    }

    fn history_len(&self) -> usize {
        self.file_uploads.len() + self.ehr_uploads.len()
    }
}

impl Validate for ClinicalEhr {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        validate_required("clinical_ehr.firstname", &self.firstname)?;
        validate_required("clinical_ehr.lastname", &self.lastname)?;
        validate_required("clinical_ehr.contact_no", &self.contact_no)?;
        validate_required("clinical_ehr.gender", &self.gender)?;
        validate_required("clinical_ehr.address", &self.address)?;
        Ok(())
    }
}

impl EhrRecord for ClinicalEhr {
    const SCHEMA: EhrSchema = EhrSchema::Clinical;

    fn from_input_v1(id: RecordId, input: EhrCreateInput) -> Result<Self, ContractViolation> {
        let EhrCreateInput::Clinical {
            firstname,
            lastname,
            contact_no,
            gender,
            birthday,
            address,
        } = input
        else {
            return Err(schema_mismatch());
        };
        let r = Self {
            id,
            firstname,
            lastname,
            contact_no,
            gender,
            birthday,
            address,
            file_uploads: Vec::new(),
            ehr_uploads: Vec::new(),
        };
        r.validate()?;
        Ok(r)
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn bootstrap_placeholder(id: RecordId, today: CalendarDate) -> Self {
        Self {
            id,
            firstname: "firstname".to_string(),
            lastname: "lastname".to_string(),
            contact_no: "contactNum".to_string(),
            gender: "gender".to_string(),
            birthday: today,
            address: "address".to_string(),
            file_uploads: Vec::new(),
            ehr_uploads: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitEhr {
    pub id: RecordId,
    pub firstname: String,
    pub lastname: String,
    #[serde(rename = "socialSecurityNum")]
    pub social_security_num: String,
    pub birthday: CalendarDate,
    #[serde(rename = "visits", default, deserialize_with = "null_as_empty")]
    pub appointments: Vec<Appointment>,
}

impl Appendable for VisitEhr {
    fn appended(mut self, entry: SubRecord) -> Result<Self, ContractViolation> {
        match entry {
            SubRecord::Appointment(a) => self.appointments.push(a),
            SubRecord::FileUpload(_) | SubRecord::EhrUpload(_) => {
                return Err(ContractViolation::InvalidValue {
                    field: "sub_record",
                    reason: "uploads are not part of the visit EHR schema",
                })
            }
        }
        Ok(self)
    }

    fn history_len(&self) -> usize {
        self.appointments.len()
    }
}

impl Validate for VisitEhr {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        validate_required("visit_ehr.firstname", &self.firstname)?;
        validate_required("visit_ehr.lastname", &self.lastname)?;
        validate_required("visit_ehr.social_security_num", &self.social_security_num)?;
        Ok(())
    }
}

impl EhrRecord for VisitEhr {
    const SCHEMA: EhrSchema = EhrSchema::Visit;

    fn from_input_v1(id: RecordId, input: EhrCreateInput) -> Result<Self, ContractViolation> {
        let EhrCreateInput::Visit {
            firstname,
            lastname,
            social_security_num,
            birthday,
        } = input
        else {
            return Err(schema_mismatch());
        };
        let r = Self {
            id,
            firstname,
            lastname,
            social_security_num,
            birthday,
            appointments: Vec::new(),
        };
        r.validate()?;
        Ok(r)
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn bootstrap_placeholder(id: RecordId, today: CalendarDate) -> Self {
        Self {
            id,
            firstname: "firstname".to_string(),
            lastname: "lastname".to_string(),
            social_security_num: "socialSecurityNum".to_string(),
            birthday: today,
            appointments: Vec::new(),
        }
    }
}

fn schema_mismatch() -> ContractViolation {
    ContractViolation::InvalidValue {
        field: "ehr_create_input",
        reason: "input shape does not match the configured EHR schema",
    }
}

/// Validated `createEHR` arguments for either schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EhrCreateInput {
    Clinical {
        firstname: String,
        lastname: String,
        contact_no: String,
        gender: String,
        birthday: CalendarDate,
        address: String,
    },
    Visit {
        firstname: String,
        lastname: String,
        social_security_num: String,
        birthday: CalendarDate,
    },
}

impl EhrCreateInput {
    pub fn clinical_v1(
        firstname: &str,
        lastname: &str,
        contact_no: &str,
        gender: &str,
        birthday: &str,
        address: &str,
    ) -> Result<Self, ContractViolation> {
        validate_required("ehr_create_input.birthday", birthday)?;
        let input = Self::Clinical {
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            contact_no: contact_no.to_string(),
            gender: gender.to_string(),
            birthday: CalendarDate::parse("birthday", birthday)?,
            address: address.to_string(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn visit_v1(
        firstname: &str,
        lastname: &str,
        social_security_num: &str,
        birthday: &str,
    ) -> Result<Self, ContractViolation> {
        validate_required("ehr_create_input.birthday", birthday)?;
        let input = Self::Visit {
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            social_security_num: social_security_num.to_string(),
            birthday: CalendarDate::parse("birthday", birthday)?,
        };
        input.validate()?;
        Ok(input)
    }

    pub fn schema(&self) -> EhrSchema {
        match self {
            EhrCreateInput::Clinical { .. } => EhrSchema::Clinical,
            EhrCreateInput::Visit { .. } => EhrSchema::Visit,
        }
    }
}

impl Validate for EhrCreateInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            EhrCreateInput::Clinical {
                firstname,
                lastname,
                contact_no,
                gender,
                address,
                ..
            } => {
                validate_required("ehr_create_input.firstname", firstname)?;
                validate_required("ehr_create_input.lastname", lastname)?;
                validate_required("ehr_create_input.contact_no", contact_no)?;
                validate_required("ehr_create_input.gender", gender)?;
                validate_required("ehr_create_input.address", address)
            }
            EhrCreateInput::Visit {
                firstname,
                lastname,
                social_security_num,
                ..
            } => {
                validate_required("ehr_create_input.firstname", firstname)?;
                validate_required("ehr_create_input.lastname", lastname)?;
                validate_required("ehr_create_input.social_security_num", social_security_num)
            }
        }
    }
}
