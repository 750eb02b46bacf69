//! Typed page properties and their Notion JSON representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Notion rejects rich text objects whose content exceeds this many
/// characters.
pub const RICH_TEXT_SEGMENT_LIMIT: usize = 2000;

/// Property name to value.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single page property, tagged by kind.
///
/// Serializes as `{"kind": "<kind>", "value": <value>}`, which is also the
/// shape the HTTP API accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    MultiSelect(Vec<String>),
    Select(String),
    Number(f64),
    /// An ISO-8601 date or date-time, passed to Notion as the range start.
    Date(String),
    Checkbox(bool),
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Title(_) => "title",
            Self::RichText(_) => "rich_text",
            Self::MultiSelect(_) => "multi_select",
            Self::Select(_) => "select",
            Self::Number(_) => "number",
            Self::Date(_) => "date",
            Self::Checkbox(_) => "checkbox",
        }
    }

    /// The property rendered as plain text.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Title(s) | Self::RichText(s) | Self::Select(s) | Self::Date(s) => s.clone(),
            Self::MultiSelect(names) => names.join(", "),
            Self::Number(n) => n.to_string(),
            Self::Checkbox(b) => b.to_string(),
        }
    }

    /// Encode as a Notion page property value.
    pub fn to_notion(&self) -> Value {
        match self {
            Self::Title(s) => json!({ "title": rich_text_segments(s) }),
            Self::RichText(s) => json!({ "rich_text": rich_text_segments(s) }),
            Self::MultiSelect(names) => json!({
                "multi_select": names.iter().map(|n| json!({ "name": n })).collect::<Vec<_>>()
            }),
            Self::Select(name) => json!({ "select": { "name": name } }),
            Self::Number(n) => json!({ "number": n }),
            Self::Date(start) => json!({ "date": { "start": start } }),
            Self::Checkbox(b) => json!({ "checkbox": b }),
        }
    }

    /// Decode a Notion page property value.
    ///
    /// Returns `None` for empty values (an unset select, number or date) and
    /// for property types this crate does not model.
    pub fn from_notion(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let inner = value.get(kind)?;

        match kind {
            "title" => Some(Self::Title(concat_plain_text(inner))),
            "rich_text" => Some(Self::RichText(concat_plain_text(inner))),
            "multi_select" => Some(Self::MultiSelect(
                inner
                    .as_array()?
                    .iter()
                    .filter_map(|o| o.get("name")?.as_str().map(ToString::to_string))
                    .collect(),
            )),
            "select" => inner
                .get("name")?
                .as_str()
                .map(|n| Self::Select(n.to_string())),
            "number" => inner.as_f64().map(Self::Number),
            "date" => inner
                .get("start")?
                .as_str()
                .map(|s| Self::Date(s.to_string())),
            "checkbox" => inner.as_bool().map(Self::Checkbox),
            _ => None,
        }
    }
}

/// Encode a full property set as the `properties` object of a page request.
pub fn to_notion_properties(properties: &Properties) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(name, value)| (name.clone(), value.to_notion()))
            .collect::<Map<_, _>>(),
    )
}

/// Decode the `properties` object of a page, skipping anything unmodelled.
pub fn from_notion_properties(properties: &Value) -> Properties {
    properties
        .as_object()
        .map(|props| {
            props
                .iter()
                .filter_map(|(name, v)| PropertyValue::from_notion(v).map(|p| (name.clone(), p)))
                .collect()
        })
        .unwrap_or_default()
}

fn rich_text_segments(s: &str) -> Vec<Value> {
    chunk_chars(s, RICH_TEXT_SEGMENT_LIMIT)
        .into_iter()
        .map(|content| json!({ "type": "text", "text": { "content": content } }))
        .collect()
}

fn chunk_chars(s: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = s;

    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(limit)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

fn concat_plain_text(segments: &Value) -> String {
    segments
        .as_array()
        .map(|segments| {
            segments
                .iter()
                .filter_map(|seg| {
                    seg.get("plain_text")
                        .or_else(|| seg.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}
