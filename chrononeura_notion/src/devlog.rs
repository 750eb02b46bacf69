//! Devlog entries: one page per logical key in the devlog database.

use std::{fmt, sync::Arc};

use serde::Deserialize;
use tracing::info;

use crate::{
    AppendPosition, DocumentStore, Error, PageRef, PropertyValue, Result, UPDATED_AT_PROPERTY,
    UpsertPolicy, property::Properties,
};

pub const TITLE_PROPERTY: &str = "Title";
pub const KEY_PROPERTY: &str = "Key";
pub const SUMMARY_PROPERTY: &str = "Summary";
pub const DETAILS_PROPERTY: &str = "Details";
pub const CATEGORY_PROPERTY: &str = "Category";

const UNCATEGORIZED: &str = "未分類";
const NO_KEY: &str = "no-key";
const DETAILS_PREVIEW_CHARS: usize = 20;

/// How a [`DevlogEntry`] is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevlogMode {
    /// Always create a new page.
    #[default]
    Create,
    /// Create or update the page for `key`.
    Upsert,
    /// Add the `append` text to the `Details` of the existing page for `key`.
    Append,
}

impl fmt::Display for DevlogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Upsert => write!(f, "upsert"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// A devlog write request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DevlogEntry {
    pub mode: DevlogMode,
    pub key: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub category: Option<Vec<String>>,
    pub append: Option<String>,
}

impl DevlogEntry {
    fn key(&self) -> Option<&str> {
        non_empty(self.key.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Generates a page title for entries that do not carry one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleBuilder;

impl TitleBuilder {
    /// `[<first category>] <key>`, followed by ` — <summary>` or, failing
    /// that, ` — ` and the start of the details.
    pub fn generate(entry: &DevlogEntry) -> String {
        let category = entry
            .category
            .as_ref()
            .and_then(|c| c.first())
            .map(String::as_str)
            .unwrap_or(UNCATEGORIZED);
        let key = entry.key().unwrap_or(NO_KEY);

        let mut title = format!("[{category}] {key}");

        if let Some(summary) = non_empty(entry.summary.as_deref()) {
            title.push_str(" — ");
            title.push_str(summary);
        } else if let Some(details) = non_empty(entry.details.as_deref()) {
            let preview: String = details.chars().take(DETAILS_PREVIEW_CHARS).collect();
            title.push_str(" — ");
            title.push_str(&preview);
            title.push_str("...");
        }

        title
    }
}

/// Writes [`DevlogEntry`]s to one database through an [`UpsertPolicy`].
#[derive(Debug)]
pub struct DevlogWriter<S> {
    policy: Arc<UpsertPolicy<S>>,
    database_id: String,
}

impl<S> DevlogWriter<S>
where
    S: DocumentStore,
{
    pub fn new(policy: Arc<UpsertPolicy<S>>, database_id: impl Into<String>) -> Self {
        Self {
            policy,
            database_id: database_id.into(),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// The page properties for `entry`, stamped with the current instant.
    pub fn properties(&self, entry: &DevlogEntry) -> Properties {
        let title = non_empty(entry.title.as_deref())
            .map(ToString::to_string)
            .unwrap_or_else(|| TitleBuilder::generate(entry));

        let mut props = Properties::from([
            (TITLE_PROPERTY.to_string(), PropertyValue::Title(title)),
            (
                UPDATED_AT_PROPERTY.to_string(),
                PropertyValue::Date(self.policy.now()),
            ),
        ]);

        let mut text = |name: &str, value: Option<&str>| {
            if let Some(v) = value {
                props.insert(name.to_string(), PropertyValue::RichText(v.to_string()));
            }
        };
        text(KEY_PROPERTY, entry.key());
        text(SUMMARY_PROPERTY, entry.summary.as_deref());
        text(DETAILS_PROPERTY, entry.details.as_deref());

        if let Some(category) = entry.category.as_ref().filter(|c| !c.is_empty()) {
            props.insert(
                CATEGORY_PROPERTY.to_string(),
                PropertyValue::MultiSelect(category.clone()),
            );
        }

        props
    }

    pub async fn write(&self, entry: &DevlogEntry) -> Result<PageRef> {
        match entry.mode {
            DevlogMode::Create => {
                let page = self
                    .policy
                    .store()
                    .create(&self.database_id, &self.properties(entry))
                    .await?;
                info!(page_id = %page.id, "created devlog page");
                Ok(page.page_ref())
            }
            DevlogMode::Upsert => {
                let key = entry.key().ok_or(Error::MissingKey(entry.mode))?;
                self.policy
                    .upsert(&self.database_id, KEY_PROPERTY, key, self.properties(entry))
                    .await
            }
            DevlogMode::Append => {
                let key = entry.key().ok_or(Error::MissingKey(entry.mode))?;
                let text = entry
                    .append
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(Error::MissingAppendText)?;
                self.policy
                    .append(
                        &self.database_id,
                        KEY_PROPERTY,
                        key,
                        DETAILS_PROPERTY,
                        text,
                        AppendPosition::Append,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDocumentStore;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use chrononeura_types::MockProvider;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DB: &str = "devlog-db";

    fn writer() -> (Arc<MemDocumentStore>, DevlogWriter<Arc<MemDocumentStore>>) {
        let store = Arc::new(MemDocumentStore::new());
        let clock = MockProvider::new(Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap());
        let policy = UpsertPolicy::new(Arc::clone(&store), Arc::new(clock));
        (store, DevlogWriter::new(Arc::new(policy), DB))
    }

    fn entry(value: serde_json::Value) -> DevlogEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn titles() {
        assert_eq!(
            TitleBuilder::generate(&entry(json!({
                "key": "20251116-Dev",
                "category": ["開発", "infra"],
                "summary": "Append test",
            }))),
            "[開発] 20251116-Dev — Append test"
        );
        assert_eq!(
            TitleBuilder::generate(&entry(json!({
                "details": "Ran the upsert from a codespace and it worked",
            }))),
            "[未分類] no-key — Ran the upsert from ..."
        );
        assert_eq!(TitleBuilder::generate(&entry(json!({}))), "[未分類] no-key");
        assert_eq!(
            TitleBuilder::generate(&entry(json!({"summary": "", "details": "short"}))),
            "[未分類] no-key — short..."
        );
    }

    #[test]
    fn properties() {
        let (_, writer) = writer();
        let props = writer.properties(&entry(json!({
            "key": "k1",
            "summary": "s",
            "category": ["dev"],
        })));

        assert_eq!(
            props,
            Properties::from([
                (
                    TITLE_PROPERTY.to_string(),
                    PropertyValue::Title("[dev] k1 — s".to_string())
                ),
                (
                    UPDATED_AT_PROPERTY.to_string(),
                    PropertyValue::Date("2025-11-16T09:00:00Z".to_string())
                ),
                (
                    KEY_PROPERTY.to_string(),
                    PropertyValue::RichText("k1".to_string())
                ),
                (
                    SUMMARY_PROPERTY.to_string(),
                    PropertyValue::RichText("s".to_string())
                ),
                (
                    CATEGORY_PROPERTY.to_string(),
                    PropertyValue::MultiSelect(vec!["dev".to_string()])
                ),
            ])
        );
    }

    #[tokio::test]
    async fn create_always_adds_a_page() {
        let (store, writer) = writer();
        let a = writer.write(&entry(json!({"key": "k1"}))).await.unwrap();
        let b = writer.write(&entry(json!({"key": "k1"}))).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.pages(DB).len(), 2);
    }

    #[tokio::test]
    async fn upsert_then_append() {
        let (store, writer) = writer();

        let created = writer
            .write(&entry(json!({
                "mode": "upsert",
                "key": "k1",
                "details": "first line",
            })))
            .await
            .unwrap();
        let updated = writer
            .write(&entry(json!({
                "mode": "upsert",
                "key": "k1",
                "summary": "now with a summary",
            })))
            .await
            .unwrap();
        assert_eq!(created.id, updated.id);

        writer
            .write(&entry(json!({
                "mode": "append",
                "key": "k1",
                "append": "second line",
            })))
            .await
            .unwrap();

        let pages = store.pages(DB);
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].properties.get(DETAILS_PROPERTY),
            Some(&PropertyValue::RichText("first line\nsecond line".to_string()))
        );
        assert_eq!(
            pages[0].properties.get(TITLE_PROPERTY),
            Some(&PropertyValue::Title("[未分類] k1 — now with a summary".to_string()))
        );
    }

    #[tokio::test]
    async fn keyed_modes_need_a_key() {
        let (store, writer) = writer();

        assert_matches!(
            writer.write(&entry(json!({"mode": "upsert"}))).await,
            Err(Error::MissingKey(DevlogMode::Upsert))
        );
        assert_matches!(
            writer.write(&entry(json!({"mode": "append", "key": " ", "append": "x"}))).await,
            Err(Error::MissingKey(DevlogMode::Append))
        );
        assert_matches!(
            writer.write(&entry(json!({"mode": "append", "key": "k1"}))).await,
            Err(Error::MissingAppendText)
        );
        assert_matches!(
            writer.write(&entry(json!({"mode": "append", "key": "k1", "append": "x"}))).await,
            Err(e) if e.is_not_found()
        );
        assert!(store.pages(DB).is_empty());
    }

    #[test]
    fn unknown_modes_are_rejected() {
        assert!(serde_json::from_value::<DevlogEntry>(json!({"mode": "delete"})).is_err());
    }
}
