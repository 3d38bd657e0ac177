//! Wire Codec
//!
//! Payloads are JSON text. A single sample object or an array of sample
//! objects is data; `{"type":"ping","timestamp":N}` and
//! `{"type":"pong","timestamp":N}` are reserved for heartbeats.
//!
//! Decoding stops at the envelope: sample objects are returned raw so the
//! session can count invalid ones individually.

use serde_json::{json, Value};
use thiserror::Error;

/// A decoded inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat request from the peer
    Ping {
        /// Timestamp to echo back
        timestamp: i64,
    },
    /// Heartbeat answer to one of our pings
    Pong {
        /// Echoed timestamp (epoch ms)
        timestamp: i64,
    },
    /// Raw sample objects, in wire order
    Samples(Vec<Value>),
}

/// A payload that is not a valid envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not JSON at all
    #[error("Failed to parse message: {0}")]
    Malformed(String),

    /// JSON, but neither an object nor an array
    #[error("Invalid data format: expected an object or an array, got {0}")]
    UnexpectedShape(&'static str),
}

/// Decode one text payload
///
/// # Errors
///
/// Returns [`DecodeError`] for non-JSON text and for scalar JSON values.
pub fn decode(text: &str) -> Result<Inbound, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(Inbound::Samples(items)),
        Value::Object(_) => {
            let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
            match kind.as_deref() {
                Some("ping") => Ok(Inbound::Ping {
                    timestamp: control_timestamp(&value),
                }),
                Some("pong") => Ok(Inbound::Pong {
                    timestamp: control_timestamp(&value),
                }),
                _ => Ok(Inbound::Samples(vec![value])),
            }
        }
        Value::Null => Err(DecodeError::UnexpectedShape("null")),
        Value::Bool(_) => Err(DecodeError::UnexpectedShape("a boolean")),
        Value::Number(_) => Err(DecodeError::UnexpectedShape("a number")),
        Value::String(_) => Err(DecodeError::UnexpectedShape("a string")),
    }
}

fn control_timestamp(value: &Value) -> i64 {
    value
        .get("timestamp")
        .and_then(|t| {
            #[allow(clippy::cast_possible_truncation)]
            t.as_i64().or_else(|| t.as_f64().map(|f| f as i64))
        })
        .unwrap_or(0)
}

/// Encode a heartbeat request
#[must_use]
pub fn ping(timestamp: i64) -> String {
    json!({ "type": "ping", "timestamp": timestamp }).to_string()
}

/// Encode a heartbeat answer
#[must_use]
pub fn pong(timestamp: i64) -> String {
    json!({ "type": "pong", "timestamp": timestamp }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ErrorCategory};

    #[test]
    fn test_single_object_is_one_sample() {
        let decoded = decode(r#"{"timestamp": 1, "value": 2.5}"#).unwrap();
        match decoded {
            Inbound::Samples(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_array_is_batch() {
        let decoded = decode(r#"[{"value": 1}, {"value": 2}, 3]"#).unwrap();
        assert!(matches!(decoded, Inbound::Samples(ref items) if items.len() == 3));
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(decode(&ping(42)).unwrap(), Inbound::Ping { timestamp: 42 });
        assert_eq!(decode(&pong(7)).unwrap(), Inbound::Pong { timestamp: 7 });
    }

    #[test]
    fn test_other_type_field_is_data() {
        let decoded = decode(r#"{"type": "reading", "timestamp": 1, "value": 1}"#).unwrap();
        assert!(matches!(decoded, Inbound::Samples(_)));
    }

    #[test]
    fn test_non_json_is_data_error() {
        let err = decode("not json {").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert_eq!(classify(&err, None).category, ErrorCategory::Data);
    }

    #[test]
    fn test_scalar_is_data_error() {
        let err = decode("42").unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedShape("a number"));
        assert_eq!(classify(&err, None).category, ErrorCategory::Data);
    }
}
