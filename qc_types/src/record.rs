//! Flat records destined for one storage table.
//!
//! Records are built without any identity from a real store. Foreign keys
//! point at the [`RecordKey`] of another record of the same report; the
//! store resolves them to row ids while inserting in dependency order.

use crate::table::Table;
use crate::value::QcValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Symbolic identity of a record within one report, e.g. `NA12878/samtools_data`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(pub String);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey(s.to_string())
    }
}

/// Content of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Value(QcValue),
    Ref(RecordKey),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub key: RecordKey,
    pub table: Table,
    pub fields: BTreeMap<String, FieldValue>,
}

impl StorageRecord {
    pub fn new(table: Table, key: impl Into<String>) -> Self {
        StorageRecord {
            key: RecordKey(key.into()),
            table,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, field: &str, value: impl Into<QcValue>) -> Self {
        self.set_value(field, value);
        self
    }

    pub fn set_value(&mut self, field: &str, value: impl Into<QcValue>) {
        self.fields.insert(field.to_string(), FieldValue::Value(value.into()));
    }

    pub fn set_ref(&mut self, field: &str, target: &StorageRecord) {
        self.set_key_ref(field, target.key.clone());
    }

    pub fn set_key_ref(&mut self, field: &str, target: RecordKey) {
        self.fields.insert(field.to_string(), FieldValue::Ref(target));
    }

    pub fn value(&self, field: &str) -> Option<&QcValue> {
        match self.fields.get(field)? {
            FieldValue::Value(v) => Some(v),
            FieldValue::Ref(_) => None,
        }
    }

    pub fn reference(&self, field: &str) -> Option<&RecordKey> {
        match self.fields.get(field)? {
            FieldValue::Ref(k) => Some(k),
            FieldValue::Value(_) => None,
        }
    }

    /// All foreign keys of this record, as `(field, target)` pairs.
    pub fn references(&self) -> impl Iterator<Item = (&str, &RecordKey)> {
        self.fields.iter().filter_map(|(f, v)| match v {
            FieldValue::Ref(k) => Some((f.as_str(), k)),
            FieldValue::Value(_) => None,
        })
    }
}
