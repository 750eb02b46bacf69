//! Clock abstraction and timestamp parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use parking_lot::RwLock;
use std::str::FromStr;

/// A source of the current time.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the current instant. No guarantees are made about monotonicity.
    fn now(&self) -> DateTime<Utc>;
}

/// A [`TimeProvider`] that uses [`Utc::now`] as a clock source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A [`TimeProvider`] that returns a fixed, manually advanced instant.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<DateTime<Utc>>,
}

impl MockProvider {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.write() = time
    }

    pub fn inc(&self, delta: TimeDelta) -> DateTime<Utc> {
        let mut now = self.now.write();
        *now += delta;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Naive layouts accepted in addition to RFC3339. They carry no offset and
/// are read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 timestamp.
///
/// RFC3339 strings keep their offset (converted to UTC). Timestamps without
/// an offset, including bare dates, are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(t.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Render an instant as RFC3339 with a `Z` suffix.
pub fn to_rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Units of an integer epoch timestamp, as given by the `precision`
/// parameter of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl Precision {
    /// The value of the `precision` parameter of the write API.
    pub fn as_query_param(&self) -> &'static str {
        match self {
            Self::Nanosecond => "ns",
            Self::Microsecond => "us",
            Self::Millisecond => "ms",
            Self::Second => "s",
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" => Ok(Self::Nanosecond),
            "us" => Ok(Self::Microsecond),
            "ms" => Ok(Self::Millisecond),
            "s" => Ok(Self::Second),
            _ => Err(format!(
                "Invalid precision '{s}'. Valid options: ns, us, ms, s"
            )),
        }
    }
}

/// Parse an integer string as an epoch in `precision` units.
///
/// Returns `None` for anything that is not an integer, or that falls outside
/// the range chrono can represent.
pub fn parse_epoch(raw: &str, precision: Precision) -> Option<DateTime<Utc>> {
    let epoch = raw.trim().parse::<i64>().ok()?;
    match precision {
        Precision::Second => DateTime::from_timestamp(epoch, 0),
        Precision::Millisecond => DateTime::from_timestamp_millis(epoch),
        Precision::Microsecond => DateTime::from_timestamp_micros(epoch),
        Precision::Nanosecond => Some(DateTime::from_timestamp_nanos(epoch)),
    }
}
