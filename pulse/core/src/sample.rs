//! Sample Data Model
//!
//! A [`Sample`] is one time-stamped, categorized numeric observation. Samples
//! are immutable once built; the only way to get one from the wire is
//! [`Sample::from_json`], which enforces the structural validity rule:
//! `timestamp` and `value` must be present and well-typed.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "id": "cpu-42",
//!   "timestamp": 1718000000000,
//!   "value": 0.73,
//!   "category": "cpu",
//!   "source": "host-a",
//!   "metadata": { "core": 3, "throttled": false }
//! }
//! ```
//!
//! `timestamp` is either epoch milliseconds or an RFC 3339 string. `id`,
//! `category`, `source` and `metadata` are optional and defaulted.

use std::mem;

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Category assigned when the wire sample carries none
pub const DEFAULT_CATEGORY: &str = "default";

/// Source assigned when the wire sample carries none
pub const DEFAULT_SOURCE: &str = "stream";

/// Ordered metadata attached to a sample (insertion order preserved)
pub type Metadata = IndexMap<String, MetadataValue>;

/// A metadata value
///
/// A small closed set of JSON-like scalars plus lists. Nested objects are
/// kept as their JSON text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// JSON `null`
    Null,
    /// Boolean flag
    Bool(bool),
    /// Whole number
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Text (also used for nested objects, serialized)
    Text(String),
    /// Ordered list of values
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    /// Convert a JSON value into a metadata value
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }

    fn estimated_size(&self) -> usize {
        let inline = mem::size_of::<Self>();
        match self {
            Self::Text(s) => inline + s.len(),
            Self::List(items) => inline + items.iter().map(Self::estimated_size).sum::<usize>(),
            _ => inline,
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Why a raw sample failed structural validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The payload element is not a JSON object
    #[error("sample is not an object")]
    NotAnObject,

    /// A required field is absent
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field has the wrong JSON type
    #[error("field `{field}` must be {expected}")]
    InvalidType {
        /// Offending field
        field: &'static str,
        /// Human description of the accepted type
        expected: &'static str,
    },

    /// A field is well-typed but unusable
    #[error("field `{field}` is out of range: {reason}")]
    OutOfRange {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// One time-stamped, categorized numeric observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifier, unique within a stream
    pub id: String,
    /// When the observation was taken
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Observed value
    pub value: f64,
    /// Grouping category (e.g. metric name)
    pub category: String,
    /// Producer of the observation
    pub source: String,
    /// Free-form ordered metadata
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: Metadata,
}

impl Sample {
    /// Create a sample with empty metadata
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        category: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            value,
            category: category.into(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a sample from a raw wire object, enforcing structural validity
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the element is not an object, or
    /// when `timestamp`/`value` are missing or mistyped.
    pub fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let timestamp = parse_timestamp(obj.get("timestamp"))?;

        let value = match obj.get("value") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("value")),
            Some(Value::Number(n)) => n.as_f64().ok_or(ValidationError::InvalidType {
                field: "value",
                expected: "a number",
            })?,
            Some(_) => {
                return Err(ValidationError::InvalidType {
                    field: "value",
                    expected: "a number",
                })
            }
        };
        if !value.is_finite() {
            return Err(ValidationError::OutOfRange {
                field: "value",
                reason: "not a finite number".to_string(),
            });
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => uuid::Uuid::new_v4().to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(ValidationError::InvalidType {
                    field: "id",
                    expected: "a string or number",
                })
            }
        };

        let category = optional_string(obj.get("category"), "category", DEFAULT_CATEGORY)?;
        let source = optional_string(obj.get("source"), "source", DEFAULT_SOURCE)?;

        let metadata = match obj.get("metadata") {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), MetadataValue::from_json(v)))
                .collect(),
            Some(_) => {
                return Err(ValidationError::InvalidType {
                    field: "metadata",
                    expected: "an object",
                })
            }
        };

        Ok(Self {
            id,
            timestamp,
            value,
            category,
            source,
            metadata,
        })
    }

    /// Whether a raw wire object would pass [`Sample::from_json`]
    #[must_use]
    pub fn is_structurally_valid(raw: &Value) -> bool {
        Self::from_json(raw).is_ok()
    }

    /// Encode as a wire object
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rough heap + inline footprint, used for memory accounting only
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        mem::size_of::<Self>()
            + self.id.len()
            + self.category.len()
            + self.source.len()
            + self
                .metadata
                .iter()
                .map(|(k, v)| k.len() + v.estimated_size())
                .sum::<usize>()
    }
}

fn parse_timestamp(field: Option<&Value>) -> Result<DateTime<Utc>, ValidationError> {
    match field {
        None | Some(Value::Null) => Err(ValidationError::MissingField("timestamp")),
        Some(Value::Number(n)) => {
            let millis = match n.as_i64() {
                Some(ms) => ms,
                #[allow(clippy::cast_possible_truncation)]
                None => n.as_f64().map(|f| f as i64).ok_or(ValidationError::InvalidType {
                    field: "timestamp",
                    expected: "epoch milliseconds or an RFC 3339 string",
                })?,
            };
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| ValidationError::OutOfRange {
                    field: "timestamp",
                    reason: format!("{millis} ms is not a representable instant"),
                })
        }
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ValidationError::OutOfRange {
                field: "timestamp",
                reason: e.to_string(),
            }),
        Some(_) => Err(ValidationError::InvalidType {
            field: "timestamp",
            expected: "epoch milliseconds or an RFC 3339 string",
        }),
    }
}

fn optional_string(
    field: Option<&Value>,
    name: &'static str,
    default: &str,
) -> Result<String, ValidationError> {
    match field {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidType {
            field: name,
            expected: "a string",
        }),
    }
}
