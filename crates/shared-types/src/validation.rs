//! # Envelope Validator
//!
//! Structural checks applied at the two pipeline checkpoints:
//!
//! - **Pre** (`validate_pre`): data entering the dispatch pipeline, either a
//!   freshly received request or a freshly built outbound request.
//! - **Post** (`validate_post`): a fully assembled response before it leaves
//!   the pipeline. Same fields as pre, plus a mandatory `status`.
//!
//! Validation never mutates its input, so validating an already-valid value
//! any number of times yields `Ok(())` every time.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// The schema a value was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Request entering the pipeline.
    Pre,
    /// Response leaving the pipeline.
    Post,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre-message"),
            Self::Post => write!(f, "post-message"),
        }
    }
}

/// How a field violated the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The field is absent.
    Missing,
    /// The field has the wrong JSON type.
    WrongType {
        /// Human-readable description of the accepted type(s).
        expected: &'static str,
    },
    /// A string field that must carry a value is empty.
    Empty,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "is missing"),
            Self::WrongType { expected } => write!(f, "must be {expected}"),
            Self::Empty => write!(f, "must not be empty"),
        }
    }
}

/// Structural validation failure naming the offending field and schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{schema} schema violation: `{field}` {violation}")]
pub struct ValidationError {
    /// Schema that was violated.
    pub schema: Schema,
    /// Dotted path of the offending field (`$` for the message itself).
    pub field: String,
    /// What was wrong with it.
    pub violation: Violation,
}

impl ValidationError {
    fn new(schema: Schema, field: impl Into<String>, violation: Violation) -> Self {
        Self {
            schema,
            field: field.into(),
            violation,
        }
    }
}

/// Validate data entering the dispatch pipeline.
///
/// Requires `request_type` and `request_id` (non-empty strings), `header`
/// with string `src` and `dst`, and a structured `body`. `status` is
/// optional and not inspected.
pub fn validate_pre(data: &Value) -> Result<(), ValidationError> {
    debug!("Validating message against pre-message schema");
    validate_common(data, Schema::Pre).map(|_| ())
}

/// Validate a fully assembled response.
///
/// Everything `validate_pre` requires, plus a `status` object with a string
/// `message` and an integer or string `code`.
pub fn validate_post(data: &Value) -> Result<(), ValidationError> {
    debug!("Validating message against post-message schema");
    let object = validate_common(data, Schema::Post)?;

    let status = require_object(object, "status", "status", Schema::Post)?;
    require_string(status, "message", "status.message", Schema::Post)?;
    match status.get("code") {
        None => Err(ValidationError::new(
            Schema::Post,
            "status.code",
            Violation::Missing,
        )),
        Some(code) if code.is_i64() || code.is_u64() || code.is_string() => Ok(()),
        Some(_) => Err(ValidationError::new(
            Schema::Post,
            "status.code",
            Violation::WrongType {
                expected: "an integer or a string",
            },
        )),
    }
}

fn validate_common(data: &Value, schema: Schema) -> Result<&Map<String, Value>, ValidationError> {
    let object = data.as_object().ok_or_else(|| {
        ValidationError::new(
            schema,
            "$",
            Violation::WrongType {
                expected: "an object",
            },
        )
    })?;

    require_non_empty_string(object, "request_type", schema)?;
    require_non_empty_string(object, "request_id", schema)?;

    let header = require_object(object, "header", "header", schema)?;
    require_string(header, "src", "header.src", schema)?;
    require_string(header, "dst", "header.dst", schema)?;

    match object.get("body") {
        None => Err(ValidationError::new(schema, "body", Violation::Missing)),
        Some(body) if body.is_object() || body.is_array() => Ok(object),
        Some(_) => Err(ValidationError::new(
            schema,
            "body",
            Violation::WrongType {
                expected: "an object or an array",
            },
        )),
    }
}

fn require_object<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    path: &str,
    schema: Schema,
) -> Result<&'a Map<String, Value>, ValidationError> {
    object
        .get(key)
        .ok_or_else(|| ValidationError::new(schema, path, Violation::Missing))?
        .as_object()
        .ok_or_else(|| {
            ValidationError::new(
                schema,
                path,
                Violation::WrongType {
                    expected: "an object",
                },
            )
        })
}

fn require_string<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    path: &str,
    schema: Schema,
) -> Result<&'a str, ValidationError> {
    object
        .get(key)
        .ok_or_else(|| ValidationError::new(schema, path, Violation::Missing))?
        .as_str()
        .ok_or_else(|| {
            ValidationError::new(
                schema,
                path,
                Violation::WrongType {
                    expected: "a string",
                },
            )
        })
}

fn require_non_empty_string(
    object: &Map<String, Value>,
    key: &str,
    schema: Schema,
) -> Result<(), ValidationError> {
    if require_string(object, key, key, schema)?.is_empty() {
        return Err(ValidationError::new(schema, key, Violation::Empty));
    }
    Ok(())
}
