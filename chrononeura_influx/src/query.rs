//! Flux query construction and CSV result decoding.

use crate::{Error, Result};
use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// One result row, column name to (string) value, in column order.
pub type Row = serde_json::Map<String, Value>;

/// Flux duration literals such as `-1h`, `30m` or `-1d12h`.
static DURATION_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d+(ns|us|µs|ms|s|mo|m|h|d|w|y))+$").expect("valid duration regex")
});

/// Quote `s` as a Flux string literal.
pub fn string_literal(s: &str) -> String {
    let escaped = s
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace("${", r"\${");
    format!(r#""{escaped}""#)
}

/// Build `from(bucket: "...") |> <pipeline>` for a client-supplied pipeline.
///
/// The pipeline is passed through verbatim; a leading `|>` is tolerated.
pub fn from_bucket(bucket: &str, pipeline: &str) -> String {
    let pipeline = pipeline.trim();
    let pipeline = pipeline.strip_prefix("|>").unwrap_or(pipeline).trim_start();
    format!("from(bucket: {}) |> {pipeline}", string_literal(bucket))
}

/// Whether `bound` can be used as a `range()` start or stop.
///
/// Accepts Flux duration literals, `now()` and RFC3339 timestamps.
pub fn is_valid_range_bound(bound: &str) -> bool {
    bound == "now()"
        || DURATION_LITERAL.is_match(bound)
        || DateTime::parse_from_rfc3339(bound).is_ok()
}

/// A query as requested by a client, not yet bound to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A Flux pipeline appended verbatim to `from(bucket: ...)`.
    Raw(String),
    /// A measurement over a time range.
    Range(RangeQuery),
}

impl Query {
    /// Render the Flux text for this query against `bucket`.
    pub fn to_flux(&self, bucket: &str) -> Result<String> {
        match self {
            Self::Raw(pipeline) => {
                let body = pipeline.trim();
                let body = body.strip_prefix("|>").unwrap_or(body).trim();
                if body.is_empty() {
                    return Err(Error::EmptyQuery);
                }
                Ok(from_bucket(bucket, body))
            }
            Self::Range(range) => {
                for bound in std::iter::once(&range.start).chain(&range.stop) {
                    if !is_valid_range_bound(bound) {
                        return Err(Error::InvalidRangeBound(bound.clone()));
                    }
                }
                Ok(range.to_flux(bucket))
            }
        }
    }
}

/// A query for every point of one measurement inside a time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub measurement: String,
    pub start: String,
    pub stop: Option<String>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub const DEFAULT_START: &'static str = "-1h";

    /// Render the query against `bucket`. Callers are expected to have
    /// checked the bounds with [`is_valid_range_bound`].
    pub fn to_flux(&self, bucket: &str) -> String {
        let range = match &self.stop {
            Some(stop) => format!("range(start: {}, stop: {})", self.start, stop),
            None => format!("range(start: {})", self.start),
        };

        let mut flux = format!(
            "{}\n  |> filter(fn: (r) => r._measurement == {})",
            from_bucket(bucket, &range),
            string_literal(&self.measurement)
        );

        if let Some(n) = self.limit {
            flux.push_str(&format!("\n  |> limit(n: {n})"));
        }

        flux
    }
}

/// Decode a Flux CSV response (header row, no annotations).
///
/// Each table in the response starts with its own header row and tables are
/// separated by blank lines. The unnamed first column is dropped.
pub(crate) fn parse_csv(body: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();

    for table in split_tables(body) {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(table.as_bytes());
        let headers = reader.headers()?.clone();

        let named: Vec<&str> = headers.iter().filter(|h| !h.is_empty()).collect();
        if named == ["error", "reference"] {
            let message = reader
                .records()
                .next()
                .transpose()?
                .and_then(|r| r.iter().find(|v| !v.is_empty()).map(ToString::to_string))
                .unwrap_or_else(|| "unknown query error".to_string());
            return Err(Error::QueryFailed(message));
        }

        for record in reader.records() {
            let record = record?;
            let row: Row = headers
                .iter()
                .zip(record.iter())
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect();
            rows.push(row);
        }
    }

    Ok(rows)
}

fn split_tables(body: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut current = String::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                tables.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.is_empty() {
        tables.push(current);
    }

    tables
}
