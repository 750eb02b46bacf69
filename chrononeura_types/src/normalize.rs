//! Key and value normalization.
//!
//! Time-series schemas only accept a narrow identifier alphabet for
//! measurement, tag and field names. Clients send whatever they like, so every
//! name goes through [`normalize_key`] before it reaches the store. The
//! transform is lossy: two distinct inputs may produce the same identifier and
//! callers have to live with that.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifier used when nothing usable survives normalization.
pub const DEFAULT_KEY: &str = "Unknown";

/// Prefix applied to identifiers that would otherwise start with a digit.
const DIGIT_PREFIX: &str = "M_";

/// Convert an arbitrary string into an identifier matching
/// `[A-Za-z_][A-Za-z0-9_]*`.
///
/// - non-ASCII characters are dropped; a run of them that sits between two
///   kept characters leaves a single `_` behind so that words stay apart
/// - any other character outside `[A-Za-z0-9_]` becomes `_`
/// - a leading digit gets an `M_` prefix
/// - an empty result becomes [`DEFAULT_KEY`]
///
/// The output is a fixed point: `normalize_key(&normalize_key(x)) == normalize_key(x)`.
///
/// ```
/// use chrononeura_types::normalize_key;
///
/// assert_eq!(normalize_key("cpu load"), "cpu_load");
/// assert_eq!(normalize_key("123abc"), "M_123abc");
/// assert_eq!(normalize_key("tag名1"), "tag_1");
/// assert_eq!(normalize_key("日本語タグ"), "Unknown");
/// ```
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut dropped_non_ascii = false;

    for c in raw.chars() {
        if !c.is_ascii() {
            dropped_non_ascii = true;
            continue;
        }

        if dropped_non_ascii && !key.is_empty() {
            key.push('_');
        }
        dropped_non_ascii = false;

        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
        } else {
            key.push('_');
        }
    }

    if key.is_empty() {
        return DEFAULT_KEY.to_string();
    }

    if key.starts_with(|c: char| c.is_ascii_digit()) {
        key.insert_str(0, DIGIT_PREFIX);
    }

    key
}

/// [`normalize_key`] for a name that may be absent.
pub fn normalize_optional_key(raw: Option<&str>) -> String {
    normalize_key(raw.unwrap_or_default())
}

/// A field value after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Anything that could be read as a finite decimal number.
    Float(f64),
    /// JSON booleans are kept as booleans.
    Bool(bool),
    /// Everything else, in its original (or JSON-rendered) form.
    String(String),
}

impl FieldValue {
    /// Short type name, used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Coerce a field value to a float when possible, otherwise keep it as a string.
///
/// This never fails. Strings are trimmed before parsing and only finite
/// results count as numeric (`"NaN"` and `"inf"` stay strings). Arrays and
/// objects are rendered as compact JSON; rejecting them is the job of the
/// payload assembler.
pub fn normalize_field_value(value: &Value) -> FieldValue {
    match value {
        Value::Number(n) => match n.as_f64().filter(|v| v.is_finite()) {
            Some(v) => FieldValue::Float(v),
            None => FieldValue::String(n.to_string()),
        },
        Value::String(s) => match parse_finite_float(s) {
            Some(v) => FieldValue::Float(v),
            None => FieldValue::String(s.clone()),
        },
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Null => FieldValue::String("null".to_string()),
        other => FieldValue::String(other.to_string()),
    }
}

/// Render a tag value as a string. Tags are labels, so no numeric coercion.
pub fn normalize_tag_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_finite_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
