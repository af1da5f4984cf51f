//! Coercion of raw MultiQC scalars into typed column values.
//!
//! MultiQC writes most numbers as JSON numbers, but several tools (hap.py,
//! Picard) emit them as strings, use `"NA"` or `"?"` as placeholders, or
//! leave fields empty. [`coerce`] maps every one of those inputs onto exactly
//! one [`QcValue`] and never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Placeholders that some tools use instead of leaving a field empty.
const MISSING_SENTINELS: [&str; 2] = ["?", "NA"];

/// A typed value destined for one column of a QC table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum QcValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl QcValue {
    pub fn is_null(&self) -> bool {
        matches!(self, QcValue::Null)
    }
}

impl fmt::Display for QcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcValue::Null => write!(f, "null"),
            QcValue::Int(i) => write!(f, "{i}"),
            QcValue::Float(x) => write!(f, "{x}"),
            QcValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for QcValue {
    fn from(s: &str) -> Self {
        QcValue::Str(s.to_string())
    }
}

impl From<String> for QcValue {
    fn from(s: String) -> Self {
        QcValue::Str(s)
    }
}

impl From<i64> for QcValue {
    fn from(i: i64) -> Self {
        QcValue::Int(i)
    }
}

impl From<f64> for QcValue {
    fn from(x: f64) -> Self {
        QcValue::Float(x)
    }
}

/// Coerce one raw JSON scalar into a [`QcValue`].
///
/// * empty values (but not the number zero) become `Null`
/// * strings that do not parse as numbers are kept, except the `"?"` and
///   `"NA"` placeholders which become `Null`
/// * NaN becomes `Null`
/// * numeric text containing a decimal point becomes a `Float`, any other
///   numeric text an `Int`
pub fn coerce(value: &Value) -> QcValue {
    match value {
        Value::Null => QcValue::Null,
        Value::Bool(b) => QcValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                QcValue::Int(i)
            } else {
                n.as_f64().map_or(QcValue::Null, finite_float)
            }
        }
        Value::String(s) => coerce_str(s),
        Value::Array(a) if a.is_empty() => QcValue::Null,
        Value::Object(o) if o.is_empty() => QcValue::Null,
        other => QcValue::Str(other.to_string()),
    }
}

/// Coerce a value that MultiQC stored as text.
pub fn coerce_str(raw: &str) -> QcValue {
    if raw.is_empty() {
        return QcValue::Null;
    }

    let trimmed = raw.trim();
    let Ok(parsed) = trimmed.parse::<f64>() else {
        if MISSING_SENTINELS.contains(&raw) {
            return QcValue::Null;
        }
        return QcValue::Str(raw.to_string());
    };

    if parsed.is_nan() {
        return QcValue::Null;
    }

    if trimmed.contains('.') {
        finite_float(parsed)
    } else {
        // "1e5" or "inf" parse as floats but not as integers
        trimmed
            .parse::<i64>()
            .map_or_else(|_| finite_float(parsed), QcValue::Int)
    }
}

fn finite_float(x: f64) -> QcValue {
    if x.is_finite() {
        QcValue::Float(x)
    } else {
        QcValue::Null
    }
}
