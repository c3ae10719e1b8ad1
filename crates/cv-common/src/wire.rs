//! Flat key-value wire encoding.
//!
//! Records travel over the log as a flat map of string keys to string values.
//! Each record type owns an explicit per-field encode/decode contract:
//! decoding fails on a missing key, an unknown key, or a value that does not
//! parse. Nothing is silently defaulted.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// One encoded record: field name to field value.
pub type FieldMap = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("{record}: missing field '{field}'")]
    MissingField { record: &'static str, field: String },

    #[error("{record}: unknown field '{field}'")]
    UnknownField { record: &'static str, field: String },

    #[error("{record}: invalid value for '{field}': {reason}")]
    InvalidValue {
        record: &'static str,
        field: String,
        reason: String,
    },

    #[error("{record}: invalid embedded document in '{field}': {source}")]
    Embedded {
        record: &'static str,
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A record with an explicit flat-map wire contract.
pub trait WireRecord: Sized {
    /// Record name used in decode errors.
    const KIND: &'static str;

    fn to_fields(&self) -> FieldMap;

    fn from_fields(fields: FieldMap) -> Result<Self, WireError>;
}

/// Consumes a [`FieldMap`] key by key and rejects leftovers.
pub struct FieldReader {
    record: &'static str,
    fields: FieldMap,
}

impl FieldReader {
    pub fn new(record: &'static str, fields: FieldMap) -> Self {
        Self { record, fields }
    }

    /// Take a required field.
    pub fn take(&mut self, field: &str) -> Result<String, WireError> {
        self.fields.remove(field).ok_or_else(|| WireError::MissingField {
            record: self.record,
            field: field.to_string(),
        })
    }

    /// Take a field that may be absent from the map.
    pub fn take_optional(&mut self, field: &str) -> Option<String> {
        self.fields.remove(field)
    }

    /// Take a required field and parse it with `FromStr`.
    pub fn take_parsed<T>(&mut self, field: &str) -> Result<T, WireError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.take(field)?;
        raw.parse::<T>().map_err(|e| self.invalid(field, e.to_string()))
    }

    /// Take a required ISO-8601 timestamp.
    pub fn take_timestamp(&mut self, field: &str) -> Result<DateTime<Utc>, WireError> {
        let raw = self.take(field)?;
        parse_timestamp(&raw).map_err(|reason| self.invalid(field, reason))
    }

    /// Take a required field holding an embedded JSON document.
    pub fn take_embedded<T: serde::de::DeserializeOwned>(&mut self, field: &str) -> Result<T, WireError> {
        let raw = self.take(field)?;
        serde_json::from_str(&raw).map_err(|source| WireError::Embedded {
            record: self.record,
            field: field.to_string(),
            source,
        })
    }

    pub fn invalid(&self, field: &str, reason: impl Into<String>) -> WireError {
        WireError::InvalidValue {
            record: self.record,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Finish decoding. Any key not taken is an error.
    pub fn finish(self) -> Result<(), WireError> {
        match self.fields.into_keys().next() {
            Some(field) => Err(WireError::UnknownField { record: self.record, field }),
            None => Ok(()),
        }
    }
}

/// Builds a [`FieldMap`] in field order.
#[derive(Default)]
pub struct FieldWriter {
    fields: FieldMap,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, field: &str, value: impl ToString) -> Self {
        self.fields.insert(field.to_string(), value.to_string());
        self
    }

    pub fn put_optional(self, field: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.put(field, v),
            None => self,
        }
    }

    pub fn put_timestamp(self, field: &str, value: &DateTime<Utc>) -> Self {
        self.put(field, value.to_rfc3339())
    }

    pub fn finish(self) -> FieldMap {
        self.fields
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("'{}' is not an ISO-8601 timestamp: {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_reader_rejects_leftover_fields() {
        let mut reader = FieldReader::new("Test", map(&[("id", "1"), ("extra", "x")]));
        assert_eq!(reader.take("id").unwrap(), "1");

        match reader.finish() {
            Err(WireError::UnknownField { field, .. }) => assert_eq!(field, "extra"),
            other => panic!("expected unknown field error, got {:?}", other),
        }
    }

    #[test]
    fn test_reader_reports_missing_field() {
        let mut reader = FieldReader::new("Test", FieldMap::new());
        let err = reader.take("id").unwrap_err();
        assert!(matches!(err, WireError::MissingField { ref field, .. } if field == "id"));
    }

    #[test]
    fn test_take_parsed_rejects_garbage() {
        let mut reader = FieldReader::new("Test", map(&[("count", "three")]));
        let err = reader.take_parsed::<u32>("count").unwrap_err();
        assert!(matches!(err, WireError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_timestamp_accepts_naive_iso() {
        let ts = parse_timestamp("2025-02-15T14:00:00.123456").unwrap();
        assert_eq!(ts.year(), 2025);
        assert_eq!(ts.hour(), 14);

        let ts = parse_timestamp("2025-02-15T14:00:00+02:00").unwrap();
        assert_eq!(ts.hour(), 12);

        assert!(parse_timestamp("yesterday").is_err());
    }
}
