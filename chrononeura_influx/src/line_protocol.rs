//! Rendering [`NormalizedRecord`]s as InfluxDB line protocol.

use crate::{Error, Precision, Result};
use chrononeura_types::time::parse_timestamp;
use chrononeura_types::{FieldValue, NormalizedRecord};
use std::{fmt, marker::PhantomData};

/// A single point, ready to be written as one line of line protocol.
#[derive(Debug)]
pub struct DataPoint<'a> {
    record: &'a NormalizedRecord,
    timestamp: Option<i64>,
}

impl<'a> DataPoint<'a> {
    /// Prepare `record` for writing, converting its timestamp (if any) to an
    /// integer in `precision` units.
    pub fn new(record: &'a NormalizedRecord, precision: Precision) -> Result<Self> {
        let timestamp = record
            .timestamp
            .as_deref()
            .map(|ts| convert_timestamp(ts, precision))
            .transpose()?;

        Ok(Self { record, timestamp })
    }
}

impl fmt::Display for DataPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Escaped::<Measurement>::new(&self.record.measurement))?;

        // empty tag values are not representable, so they are skipped
        for (k, v) in self.record.tags.iter().filter(|(_, v)| !v.is_empty()) {
            write!(
                f,
                ",{}={}",
                Escaped::<TagKey>::new(k),
                Escaped::<TagKey>::new(v)
            )?;
        }

        for (i, (k, v)) in self.record.fields.iter().enumerate() {
            let d = if i == 0 { " " } else { "," };
            write!(f, "{}{}={}", d, Escaped::<TagKey>::new(k), LpFieldValue(v))?;
        }

        if let Some(ts) = self.timestamp {
            write!(f, " {ts}")?;
        }

        Ok(())
    }
}

/// Convert a timestamp string into an integer in `precision` units.
///
/// Integer strings are taken as already being in `precision` units. Anything
/// else must parse as RFC3339 or a naive ISO-8601 timestamp (read as UTC).
pub fn convert_timestamp(raw: &str, precision: Precision) -> Result<i64> {
    let trimmed = raw.trim();
    if let Ok(epoch) = trimmed.parse::<i64>() {
        return Ok(epoch);
    }

    let time = parse_timestamp(trimmed).ok_or_else(|| Error::InvalidTimestamp(raw.to_string()))?;

    match precision {
        Precision::Second => Ok(time.timestamp()),
        Precision::Millisecond => Ok(time.timestamp_millis()),
        Precision::Microsecond => Ok(time.timestamp_micros()),
        Precision::Nanosecond => time
            .timestamp_nanos_opt()
            .ok_or_else(|| Error::TimestampOutOfRange(raw.to_string())),
    }
}

struct LpFieldValue<'a>(&'a FieldValue);

impl fmt::Display for LpFieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, r#""{}""#, Escaped::<FieldValueString>::new(v)),
        }
    }
}

/// A string that is escaped according to the rules of `K` when displayed.
struct Escaped<'a, K>(&'a str, PhantomData<K>);

impl<'a, K> Escaped<'a, K> {
    fn new(s: &'a str) -> Self {
        Self(s, PhantomData)
    }
}

impl<K> fmt::Display for Escaped<'_, K>
where
    K: EscapeRules,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut last = 0;

        for (idx, delim) in self.0.match_indices(K::DELIMITERS) {
            let s = &self.0[last..idx];
            write!(f, r#"{s}\{delim}"#)?;
            last = idx + delim.len();
        }

        self.0[last..].fmt(f)
    }
}

/// Specifies how to escape a particular piece of line protocol.
trait EscapeRules {
    /// The delimiters that need to be escaped
    const DELIMITERS: &'static [char];
}

/// Rules to escape a measurement name
struct Measurement;

/// Rules to escape a tag key, tag value or field key
struct TagKey;

/// Rules to escape a field value string
struct FieldValueString;

impl EscapeRules for Measurement {
    const DELIMITERS: &'static [char] = &[',', ' '];
}

impl EscapeRules for TagKey {
    const DELIMITERS: &'static [char] = &[',', '=', ' '];
}

impl EscapeRules for FieldValueString {
    const DELIMITERS: &'static [char] = &['"', '\\'];
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn record(timestamp: Option<&str>) -> NormalizedRecord {
        NormalizedRecord {
            measurement: "swap".to_string(),
            tags: BTreeMap::from([
                ("host".to_string(), "server01".to_string()),
                ("name".to_string(), "disk0".to_string()),
            ]),
            fields: BTreeMap::from([
                ("in".to_string(), FieldValue::Float(3.0)),
                ("out".to_string(), FieldValue::Float(4.5)),
            ]),
            timestamp: timestamp.map(ToString::to_string),
        }
    }

    #[test]
    fn renders_tags_fields_and_timestamp() {
        let r = record(Some("1970-01-01T00:00:01Z"));
        let point = DataPoint::new(&r, Precision::Second).unwrap();
        assert_eq!(
            point.to_string(),
            "swap,host=server01,name=disk0 in=3,out=4.5 1"
        );
    }

    #[test]
    fn no_timestamp_means_server_time() {
        let r = record(None);
        let point = DataPoint::new(&r, Precision::Nanosecond).unwrap();
        assert_eq!(point.to_string(), "swap,host=server01,name=disk0 in=3,out=4.5");
    }

    #[test]
    fn field_types() {
        let r = NormalizedRecord {
            measurement: "m".to_string(),
            tags: BTreeMap::new(),
            fields: BTreeMap::from([
                ("a".to_string(), FieldValue::Bool(true)),
                ("b".to_string(), FieldValue::String(r#"say "hi" \o/"#.to_string())),
                ("c".to_string(), FieldValue::Float(-0.25)),
            ]),
            timestamp: None,
        };
        let point = DataPoint::new(&r, Precision::Nanosecond).unwrap();
        assert_eq!(point.to_string(), r#"m a=true,b="say \"hi\" \\o/",c=-0.25"#);
    }

    #[test]
    fn tag_values_are_escaped_and_empty_ones_skipped() {
        let r = NormalizedRecord {
            measurement: "m".to_string(),
            tags: BTreeMap::from([
                ("empty".to_string(), String::new()),
                ("loc".to_string(), "a b,c=d".to_string()),
            ]),
            fields: BTreeMap::from([("v".to_string(), FieldValue::Float(1.0))]),
            timestamp: None,
        };
        let point = DataPoint::new(&r, Precision::Nanosecond).unwrap();
        assert_eq!(point.to_string(), r"m,loc=a\ b\,c\=d v=1");
    }

    #[test]
    fn special_characters_are_escaped() {
        const ALL_THE_DELIMITERS: &str = r#"alpha,beta=delta gamma"epsilon"#;
        assert_eq!(
            Escaped::<Measurement>::new(ALL_THE_DELIMITERS).to_string(),
            r#"alpha\,beta=delta\ gamma"epsilon"#
        );
        assert_eq!(
            Escaped::<TagKey>::new(ALL_THE_DELIMITERS).to_string(),
            r#"alpha\,beta\=delta\ gamma"epsilon"#
        );
        assert_eq!(
            Escaped::<FieldValueString>::new(ALL_THE_DELIMITERS).to_string(),
            r#"alpha,beta=delta gamma\"epsilon"#
        );
    }

    #[test]
    fn timestamp_precision() {
        let ts = "2025-11-14T05:12:00.123456789Z";
        assert_eq!(convert_timestamp(ts, Precision::Second).unwrap(), 1_763_097_120);
        assert_eq!(
            convert_timestamp(ts, Precision::Millisecond).unwrap(),
            1_763_097_120_123
        );
        assert_eq!(
            convert_timestamp(ts, Precision::Microsecond).unwrap(),
            1_763_097_120_123_456
        );
        assert_eq!(
            convert_timestamp(ts, Precision::Nanosecond).unwrap(),
            1_763_097_120_123_456_789
        );
    }

    #[test]
    fn epoch_strings_pass_through() {
        assert_eq!(convert_timestamp("1700000000", Precision::Second).unwrap(), 1_700_000_000);
    }

    #[test]
    fn bad_timestamps_are_rejected() {
        assert_matches!(
            convert_timestamp("soon", Precision::Nanosecond),
            Err(Error::InvalidTimestamp(ts)) if ts == "soon"
        );
        assert_matches!(
            convert_timestamp("2500-01-01T00:00:00Z", Precision::Nanosecond),
            Err(Error::TimestampOutOfRange(_))
        );
        let r = record(Some("soon"));
        assert_matches!(
            DataPoint::new(&r, Precision::Second),
            Err(Error::InvalidTimestamp(_))
        );
    }
}
