#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_required;
use crate::{CalendarDate, ContractViolation, RecordId, Validate};

/// Fields captured by the intake form shape of `createPatient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDemographics {
    pub firstname: String,
    pub lastname: String,
    pub gender: String,
    pub birthday: CalendarDate,
    pub address: String,
}

impl Validate for PatientDemographics {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required("patient.demographics.firstname", &self.firstname)?;
        validate_required("patient.demographics.lastname", &self.lastname)?;
        validate_required("patient.demographics.gender", &self.gender)?;
        validate_required("patient.demographics.address", &self.address)?;
        Ok(())
    }
}

/// Patient identity document. Written once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: RecordId,
    pub name: String,
    #[serde(rename = "contactNo")]
    pub contact_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographics: Option<PatientDemographics>,
}

impl Patient {
    pub fn from_input_v1(id: RecordId, input: PatientCreateInput) -> Result<Self, ContractViolation> {
        input.validate()?;
        let patient = match input {
            PatientCreateInput::Basic { name, contact_no } => Self {
                id,
                name,
                contact_no,
                demographics: None,
            },
            PatientCreateInput::Intake {
                contact_no,
                demographics,
            } => Self {
                id,
                name: format!("{} {}", demographics.firstname, demographics.lastname),
                contact_no,
                demographics: Some(demographics),
            },
        };
        patient.validate()?;
        Ok(patient)
    }
}

impl Validate for Patient {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        validate_required("patient.name", &self.name)?;
        validate_required("patient.contact_no", &self.contact_no)?;
        if let Some(d) = &self.demographics {
            d.validate()?;
        }
        Ok(())
    }
}

/// Accepted argument shapes for `createPatient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientCreateInput {
    Basic {
        name: String,
        contact_no: String,
    },
    Intake {
        contact_no: String,
        demographics: PatientDemographics,
    },
}

impl PatientCreateInput {
    pub fn basic_v1(
        name: impl Into<String>,
        contact_no: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let input = Self::Basic {
            name: name.into(),
            contact_no: contact_no.into(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn intake_v1(
        firstname: &str,
        lastname: &str,
        contact_no: &str,
        gender: &str,
        birthday: &str,
        address: &str,
    ) -> Result<Self, ContractViolation> {
        validate_required("patient_create_input.birthday", birthday)?;
        let input = Self::Intake {
            contact_no: contact_no.to_string(),
            demographics: PatientDemographics {
                firstname: firstname.to_string(),
                lastname: lastname.to_string(),
                gender: gender.to_string(),
                birthday: CalendarDate::parse("birthday", birthday)?,
                address: address.to_string(),
            },
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for PatientCreateInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            PatientCreateInput::Basic { name, contact_no } => {
                validate_required("patient_create_input.name", name)?;
                validate_required("patient_create_input.contact_no", contact_no)
            }
            PatientCreateInput::Intake {
                contact_no,
                demographics,
            } => {
                validate_required("patient_create_input.contact_no", contact_no)?;
                demographics.validate()
            }
        }
    }
}
