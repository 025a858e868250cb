//! Per-column value containers.

use crate::error::{ColumnError, ColumnValidationError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The state of one column inside a record.
///
/// A container is set at most once. Writing a new value for the column
/// means replacing the whole container, which is what forces every
/// incoming value back through the column pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordValue {
    /// The value as received, before normalization. Only kept when it
    /// differs from the normalized value.
    raw_value: Option<Value>,
    /// The normalized value.
    value: Option<Value>,
    /// Whether a value has been committed into this container.
    has_value: bool,
    /// Whether the committed value came from the database.
    is_from_db: bool,
    /// Arbitrary side-band data attached by column behaviors.
    payload: HashMap<String, serde_json::Value>,
    /// Validation errors recorded against the attempted value.
    errors: Vec<ColumnValidationError>,
    /// Whether the owning column is persisted.
    column_exists_in_db: bool,
}

impl RecordValue {
    /// Create an empty container for a column.
    pub fn new(column_exists_in_db: bool) -> Self {
        Self {
            column_exists_in_db,
            ..Self::default()
        }
    }

    /// Commit a value into this container.
    ///
    /// Fails if a value was already committed; the caller must use a
    /// fresh container instead.
    pub fn set_value(
        &mut self,
        column: &str,
        value: Value,
        raw_value: Option<Value>,
        is_from_db: bool,
    ) -> Result<()> {
        if self.has_value {
            return Err(ColumnError::value_already_set(column).into());
        }
        self.value = Some(value);
        self.raw_value = raw_value;
        self.has_value = true;
        self.is_from_db = is_from_db;
        self.errors.clear();
        self.payload.clear();
        Ok(())
    }

    /// Record validation errors for a rejected value.
    ///
    /// The container stays valueless; the errors remain readable until
    /// the container is replaced.
    pub fn set_errors(&mut self, errors: Vec<ColumnValidationError>) {
        self.errors = errors;
        self.has_value = false;
        self.value = None;
        self.raw_value = None;
    }

    /// Whether a value has been committed.
    pub const fn has_value(&self) -> bool {
        self.has_value
    }

    /// Whether the committed value came from the database.
    pub const fn is_from_db(&self) -> bool {
        self.is_from_db
    }

    /// Mark the current value as database-sourced.
    ///
    /// Used after a save writes the value out, and by the trust path
    /// when the incoming DB value matches what is already held.
    pub fn mark_from_db(&mut self) {
        self.is_from_db = true;
    }

    /// Detach the current value from its database origin.
    ///
    /// Used when the record's primary key is replaced or unset; every
    /// other value must be re-validated and re-saved.
    pub fn mark_not_from_db(&mut self) {
        self.is_from_db = false;
    }

    /// The normalized value, if committed.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The pre-normalization value. Falls back to the normalized value
    /// when normalization changed nothing.
    pub fn raw_value(&self) -> Option<&Value> {
        self.raw_value.as_ref().or(self.value.as_ref())
    }

    /// Validation errors recorded against the last attempted value.
    pub fn errors(&self) -> &[ColumnValidationError] {
        &self.errors
    }

    /// Whether the owning column is persisted.
    pub const fn column_exists_in_db(&self) -> bool {
        self.column_exists_in_db
    }

    /// Attach side-band data to this container.
    ///
    /// For persisted columns a value must be committed first; virtual
    /// columns accept payload at any time.
    pub fn set_payload(
        &mut self,
        column: &str,
        key: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<()> {
        if !self.has_value && self.column_exists_in_db {
            return Err(ColumnError::payload_before_value(column).into());
        }
        self.payload.insert(key.into(), data);
        Ok(())
    }

    /// Read side-band data by key.
    pub fn payload(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    /// All side-band data.
    pub fn payload_map(&self) -> &HashMap<String, serde_json::Value> {
        &self.payload
    }

    /// Capture this container for serialization.
    pub fn to_snapshot(&self) -> ValueSnapshot {
        ValueSnapshot {
            raw_value: self.raw_value.as_ref().map(Value::to_json),
            value: self.value.as_ref().map(Value::to_json),
            has_value: self.has_value,
            is_from_db: self.is_from_db,
            payload: self.payload.clone(),
        }
    }
}

/// Serializable capture of a [`RecordValue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub raw_value: Option<serde_json::Value>,
    pub value: Option<serde_json::Value>,
    pub has_value: bool,
    pub is_from_db: bool,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn set_once_enforced() {
        let mut rv = RecordValue::new(true);
        assert!(!rv.has_value());
        rv.set_value("name", Value::Text("a".into()), None, false)
            .unwrap();
        assert!(rv.has_value());
        let err = rv
            .set_value("name", Value::Text("b".into()), None, false)
            .unwrap_err();
        assert!(matches!(err, Error::Column(_)));
        assert_eq!(rv.value(), Some(&Value::Text("a".into())));
    }

    #[test]
    fn raw_value_falls_back_to_normalized() {
        let mut rv = RecordValue::new(true);
        rv.set_value(
            "email",
            Value::Text("a@b.c".into()),
            Some(Value::Text(" A@B.C ".into())),
            false,
        )
        .unwrap();
        assert_eq!(rv.raw_value(), Some(&Value::Text(" A@B.C ".into())));

        let mut rv = RecordValue::new(true);
        rv.set_value("email", Value::Text("a@b.c".into()), None, false)
            .unwrap();
        assert_eq!(rv.raw_value(), Some(&Value::Text("a@b.c".into())));
    }

    #[test]
    fn payload_requires_value_on_persisted_columns() {
        let mut rv = RecordValue::new(true);
        let err = rv
            .set_payload("file", "tmp_path", serde_json::json!("/tmp/x"))
            .unwrap_err();
        assert!(matches!(err, Error::Column(_)));

        rv.set_value("file", Value::Text("x.png".into()), None, false)
            .unwrap();
        rv.set_payload("file", "tmp_path", serde_json::json!("/tmp/x"))
            .unwrap();
        assert_eq!(rv.payload("tmp_path"), Some(&serde_json::json!("/tmp/x")));
    }

    #[test]
    fn virtual_columns_accept_payload_without_value() {
        let mut rv = RecordValue::new(false);
        rv.set_payload("virtual", "k", serde_json::json!(1)).unwrap();
        assert_eq!(rv.payload("k"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn errors_leave_container_valueless() {
        let mut rv = RecordValue::new(true);
        rv.set_errors(vec![ColumnValidationError {
            column: "age".into(),
            kind: crate::error::ValueErrorKind::CannotBeNull,
            message: "value cannot be null".into(),
        }]);
        assert!(!rv.has_value());
        assert_eq!(rv.errors().len(), 1);
    }
}
