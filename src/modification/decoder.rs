//! Instruction Decoder
//!
//! Parses the control header value (a JSON array of edit objects) into an
//! `OperationPlan`. Field extraction is lenient: missing or non-string
//! `position`/`value`/`type`/`operation` fields read as empty strings.
//! An element that still fails validation is dropped and reported, and
//! decoding carries on with the next one.

use serde_json::{Map, Value};
use std::fmt;

use super::op::{ModifyOp, ModifyType, Operation};
use super::plan::OperationPlan;

const FIELD_POSITION: &str = "position";
const FIELD_VALUE: &str = "value";
const FIELD_TYPE: &str = "type";
const FIELD_OPERATION: &str = "operation";
const FIELD_LENGTH: &str = "length";

/// Decode failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header value is not a JSON array; no operations apply
    MalformedJson(String),
    /// One element failed validation and was dropped
    InvalidOperation {
        index: usize,
        field: &'static str,
        value: String,
    },
    /// One element asked for an interpretation mode this filter lacks
    UnsupportedType { index: usize, value: String },
}

impl DecodeError {
    /// Index of the dropped element, if this error concerns a single one
    pub fn element_index(&self) -> Option<usize> {
        match self {
            DecodeError::MalformedJson(_) => None,
            DecodeError::InvalidOperation { index, .. } | DecodeError::UnsupportedType { index, .. } => {
                Some(*index)
            }
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MalformedJson(e) => write!(f, "malformed instruction list: {}", e),
            DecodeError::InvalidOperation { index, field, value } => {
                write!(f, "element {}: invalid {} '{}'", index, field, value)
            }
            DecodeError::UnsupportedType { index, value } => {
                write!(f, "element {}: unsupported type '{}'", index, value)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result of decoding a well-formed instruction list
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// Accepted operations in declaration order
    pub plan: OperationPlan,
    /// Elements dropped during decoding
    pub rejected: Vec<DecodeError>,
}

/// Decode a control header value.
///
/// A blank value decodes to an empty plan. Anything that is not a JSON
/// array yields `DecodeError::MalformedJson`.
pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
    if raw.trim().is_empty() {
        return Ok(Decoded::default());
    }

    let document: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;

    let elements = match document {
        Value::Array(elements) => elements,
        other => {
            return Err(DecodeError::MalformedJson(format!(
                "expected array, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut ops = Vec::with_capacity(elements.len());
    let mut rejected = Vec::new();

    for (index, element) in elements.iter().enumerate() {
        match decode_element(index, element) {
            Ok(op) => ops.push(op),
            Err(e) => rejected.push(e),
        }
    }

    Ok(Decoded {
        plan: OperationPlan::new(ops),
        rejected,
    })
}

fn decode_element(index: usize, element: &Value) -> Result<ModifyOp, DecodeError> {
    let object = element.as_object().ok_or_else(|| DecodeError::InvalidOperation {
        index,
        field: "element",
        value: element.to_string(),
    })?;

    let position = string_field(object, FIELD_POSITION);
    let value = string_field(object, FIELD_VALUE);
    let type_name = string_field(object, FIELD_TYPE);
    let operation_name = string_field(object, FIELD_OPERATION);

    let operation = Operation::parse(&operation_name).ok_or_else(|| DecodeError::InvalidOperation {
        index,
        field: FIELD_OPERATION,
        value: operation_name.clone(),
    })?;

    // Only byte mode exists; the type gates the element but is not kept
    if ModifyType::parse(&type_name).is_none() {
        return Err(DecodeError::UnsupportedType {
            index,
            value: type_name,
        });
    }

    let length = match object.get(FIELD_LENGTH) {
        None | Some(Value::Null) => 0,
        Some(raw) => length_value(raw).ok_or_else(|| DecodeError::InvalidOperation {
            index,
            field: FIELD_LENGTH,
            value: raw.to_string(),
        })?,
    };

    Ok(ModifyOp {
        position,
        value,
        operation,
        length,
    })
}

/// Non-negative integer length, saturated to `usize::MAX`.
/// The engine clamps ranges to the body end, so any oversized length
/// behaves like "through the end".
fn length_value(raw: &Value) -> Option<usize> {
    if let Some(n) = raw.as_u64() {
        return Some(usize::try_from(n).unwrap_or(usize::MAX));
    }
    // Integers past u64 arrive as floats
    match raw.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Some(usize::MAX),
        _ => None,
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_default()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
