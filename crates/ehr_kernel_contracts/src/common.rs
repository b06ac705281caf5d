#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const BIRTHDAY_LAYOUT: &str = "%Y-%m-%d";
pub const RECORD_ID_MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("{field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field}: expected {expected}, got {got:?}")]
    InvalidFormat {
        field: &'static str,
        expected: &'static str,
        got: String,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_required(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    Ok(())
}

/// Primary key of a ledger record. Always the identifier of the transaction that created it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(v.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RecordId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required("record_id", &self.0)?;
        if self.0.len() > RECORD_ID_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "record_id",
                reason: "exceeds max length",
            });
        }
        Ok(())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A UTC instant with seconds and sub-second precision discarded.
///
/// Sub-record timestamps are stored at minute resolution for compatibility with documents
/// already on the ledger. Two appends in the same minute carry equal timestamps and are
/// ordered only by their position in the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteTimestamp(DateTime<Utc>);

impl MinuteTimestamp {
    pub fn truncate(at: DateTime<Utc>) -> Self {
        let floored = at
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .unwrap_or(at);
        Self(floored)
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl Serialize for MinuteTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for MinuteTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let parsed = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
        Ok(Self::truncate(parsed.with_timezone(&Utc)))
    }
}

/// Calendar date without time-of-day, written and parsed strictly as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ContractViolation> {
        let invalid = || ContractViolation::InvalidFormat {
            field,
            expected: "calendar date as YYYY-MM-DD",
            got: raw.to_string(),
        };
        if !has_date_shape(raw) {
            return Err(invalid());
        }
        NaiveDate::parse_from_str(raw, BIRTHDAY_LAYOUT)
            .map(Self)
            .map_err(|_| invalid())
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }
}

// chrono accepts unpadded and signed years; the ledger format does not.
fn has_date_shape(raw: &str) -> bool {
    let b = raw.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b
            .iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BIRTHDAY_LAYOUT))
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// Older ledger documents carry the date as a full RFC 3339 datetime at midnight.
impl<'de> Deserialize<'de> for CalendarDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.len() > 10 {
            if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
                return Ok(Self(at.date_naive()));
            }
        }
        Self::parse("birthday", &raw).map_err(serde::de::Error::custom)
    }
}

/// Decodes an absent or `null` history list as empty.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
