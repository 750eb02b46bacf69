//! Inbound payloads and their normalized form.

use crate::normalize::{FieldValue, normalize_field_value, normalize_key, normalize_tag_value};
use crate::time::{Precision, TimeProvider, parse_epoch, parse_timestamp, to_rfc3339};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a payload cannot be turned into a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field 'measurement'")]
    MissingMeasurement,

    #[error("'measurement' must be a string")]
    InvalidMeasurement,

    #[error("missing required field 'fields'")]
    MissingFields,

    #[error("'fields' must be a JSON object")]
    InvalidFields,

    #[error("'fields' must contain at least one entry")]
    EmptyFields,

    #[error("field '{key}' holds a JSON {kind}; lists and objects are not accepted as field values")]
    UnsupportedFieldValue { key: String, kind: &'static str },

    #[error("'tags' must be a JSON object")]
    InvalidTags,

    #[error("'timestamp' must be a string")]
    InvalidTimestamp,

    #[error("'bucket' must be a string")]
    InvalidBucket,
}

/// An untyped inbound payload, split into its known keys.
///
/// Explicit `null`s are treated as absent. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPayload {
    pub measurement: Option<Value>,
    pub tags: Option<Value>,
    pub fields: Option<Value>,
    pub timestamp: Option<Value>,
    pub mode: Option<Value>,
    pub bucket: Option<Value>,
}

impl RawPayload {
    /// The `mode` key, when it is a string. Other types are ignored so that
    /// routing still falls back to prod.
    pub fn mode(&self) -> Option<&str> {
        self.mode.as_ref().and_then(Value::as_str)
    }

    /// The explicit `bucket` override, if any.
    pub fn bucket(&self) -> Result<Option<&str>, ValidationError> {
        match &self.bucket {
            None => Ok(None),
            Some(Value::String(b)) => Ok(Some(b)),
            Some(_) => Err(ValidationError::InvalidBucket),
        }
    }
}

impl TryFrom<Value> for RawPayload {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let mut take = |key: &str| map.remove(key).filter(|v| !v.is_null());

        Ok(Self {
            measurement: take("measurement"),
            tags: take("tags"),
            fields: take("fields"),
            timestamp: take("timestamp"),
            mode: take("mode"),
            bucket: take("bucket"),
        })
    }
}

/// A record ready to be handed to the time-series store.
///
/// Every key has been through [`normalize_key`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: Option<String>,
}

/// What to do with the payload's `timestamp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Hand the client's string to the store unchanged; absent stays absent
    /// and the store assigns its own time.
    #[default]
    PassThrough,
    /// Rewrite to RFC3339 UTC. Missing or unparsable timestamps are replaced
    /// with the current instant.
    Canonicalize,
}

impl FromStr for TimestampPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass-through" | "passthrough" => Ok(Self::PassThrough),
            "canonicalize" => Ok(Self::Canonicalize),
            _ => Err(format!(
                "Invalid timestamp policy '{s}'. Valid options: pass-through, canonicalize"
            )),
        }
    }
}

impl fmt::Display for TimestampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough => write!(f, "pass-through"),
            Self::Canonicalize => write!(f, "canonicalize"),
        }
    }
}

/// Turns [`RawPayload`]s into [`NormalizedRecord`]s.
#[derive(Debug, Clone)]
pub struct PayloadAssembler {
    policy: TimestampPolicy,
    time_provider: Arc<dyn TimeProvider>,
}

impl PayloadAssembler {
    pub fn new(policy: TimestampPolicy, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            policy,
            time_provider,
        }
    }

    pub fn policy(&self) -> TimestampPolicy {
        self.policy
    }

    /// Normalize the measurement, every tag and every field of `raw`.
    ///
    /// When two keys normalize to the same identifier the one appearing later
    /// in the payload wins.
    pub fn assemble(&self, raw: &RawPayload) -> Result<NormalizedRecord, ValidationError> {
        self.assemble_with_precision(raw, Precision::default())
    }

    /// As [`Self::assemble`], reading integer timestamps as epochs in
    /// `precision` units when they are canonicalized.
    pub fn assemble_with_precision(
        &self,
        raw: &RawPayload,
        precision: Precision,
    ) -> Result<NormalizedRecord, ValidationError> {
        let measurement = match &raw.measurement {
            None => return Err(ValidationError::MissingMeasurement),
            Some(Value::String(m)) => normalize_key(m),
            Some(_) => return Err(ValidationError::InvalidMeasurement),
        };

        let tags = match &raw.tags {
            None => BTreeMap::new(),
            Some(Value::Object(tags)) => tags
                .iter()
                .map(|(k, v)| (normalize_key(k), normalize_tag_value(v)))
                .collect(),
            Some(_) => return Err(ValidationError::InvalidTags),
        };

        let fields = match &raw.fields {
            None => return Err(ValidationError::MissingFields),
            Some(Value::Object(fields)) => normalize_fields(fields)?,
            Some(_) => return Err(ValidationError::InvalidFields),
        };

        let timestamp = self.timestamp(raw.timestamp.as_ref(), precision)?;

        Ok(NormalizedRecord {
            measurement,
            tags,
            fields,
            timestamp,
        })
    }

    fn timestamp(
        &self,
        raw: Option<&Value>,
        precision: Precision,
    ) -> Result<Option<String>, ValidationError> {
        let raw = match raw {
            None => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => return Err(ValidationError::InvalidTimestamp),
        };

        Ok(match self.policy {
            TimestampPolicy::PassThrough => raw.map(ToString::to_string),
            TimestampPolicy::Canonicalize => {
                let time = raw
                    .and_then(|ts| parse_epoch(ts, precision).or_else(|| parse_timestamp(ts)))
                    .unwrap_or_else(|| self.time_provider.now());
                Some(to_rfc3339(time))
            }
        })
    }
}

fn normalize_fields(
    fields: &Map<String, Value>,
) -> Result<BTreeMap<String, FieldValue>, ValidationError> {
    if fields.is_empty() {
        return Err(ValidationError::EmptyFields);
    }

    fields
        .iter()
        .map(|(k, v)| match v {
            Value::Array(_) => Err(ValidationError::UnsupportedFieldValue {
                key: k.clone(),
                kind: "array",
            }),
            Value::Object(_) => Err(ValidationError::UnsupportedFieldValue {
                key: k.clone(),
                kind: "object",
            }),
            v => Ok((normalize_key(k), normalize_field_value(v))),
        })
        .collect()
}
