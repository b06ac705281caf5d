#![forbid(unsafe_code)]

pub mod common;
pub mod ehr;
pub mod error;
pub mod patient;

pub use common::{CalendarDate, ContractViolation, MinuteTimestamp, RecordId, Validate};
pub use error::{RecordError, RecordErrorKind};
