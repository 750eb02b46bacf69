//! Create-or-update by key, and read-modify-write appends.
//!
//! Neither operation is atomic against the store. Two concurrent upserts for
//! a key that does not exist yet can both miss the lookup and both create a
//! page, and two concurrent appends can lose one of the writes. [`KeyLocks`]
//! serializes the sequence for one key within this process only.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use chrononeura_types::{TimeProvider, time::to_rfc3339};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::{DocumentStore, Error, PageRef, PropertyValue, Result, property::Properties};

/// Property stamped with the current instant by [`UpsertPolicy::append`].
pub const UPDATED_AT_PROPERTY: &str = "UpdatedAt";

/// Where appended text goes relative to the existing content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendPosition {
    #[default]
    Append,
    Prepend,
}

impl AppendPosition {
    fn combine(&self, existing: &str, text: &str) -> String {
        if existing.is_empty() {
            return text.to_string();
        }
        match self {
            Self::Append => format!("{existing}\n{text}"),
            Self::Prepend => format!("{text}\n{existing}"),
        }
    }
}

impl FromStr for AppendPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            _ => Err(format!(
                "Invalid position '{s}'. Valid options: append, prepend"
            )),
        }
    }
}

impl fmt::Display for AppendPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Prepend => write!(f, "prepend"),
        }
    }
}

/// In-process mutual exclusion per `(database, key property, key value)`.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`. The lock is released when the
    /// returned guard is dropped.
    pub async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // forget locks nobody holds or waits on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Upsert and append on top of a [`DocumentStore`].
#[derive(Debug)]
pub struct UpsertPolicy<S> {
    store: S,
    time_provider: Arc<dyn TimeProvider>,
    locks: Option<KeyLocks>,
}

impl<S> UpsertPolicy<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
            locks: None,
        }
    }

    /// Serialize operations on the same key within this process.
    pub fn with_key_locks(mut self) -> Self {
        self.locks = Some(KeyLocks::new());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn now(&self) -> String {
        to_rfc3339(self.time_provider.now())
    }

    async fn guard(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
    ) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(
                locks
                    .lock(format!("{database_id}\u{0}{key_property}\u{0}{key_value}"))
                    .await,
            ),
            None => None,
        }
    }

    /// Update the page whose `key_property` equals `key_value`, or create it.
    ///
    /// A created page additionally gets `key_property` set to `key_value` as
    /// rich text, unless `properties` already sets it.
    pub async fn upsert(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
        mut properties: Properties,
    ) -> Result<PageRef> {
        let _guard = self.guard(database_id, key_property, key_value).await;

        let page = match self
            .store
            .find_by_key(database_id, key_property, key_value)
            .await?
        {
            Some(existing) => {
                debug!(page_id = %existing.id, %key_property, %key_value, "updating existing page");
                self.store.update(&existing.id, &properties).await?
            }
            None => {
                properties
                    .entry(key_property.to_string())
                    .or_insert_with(|| PropertyValue::RichText(key_value.to_string()));
                let page = self.store.create(database_id, &properties).await?;
                info!(page_id = %page.id, %key_property, %key_value, "created page");
                page
            }
        };

        Ok(page.page_ref())
    }

    /// Add `text` to the `field_name` property of the page keyed by
    /// `key_value`, separated from the existing content by a newline.
    ///
    /// Fails with [`Error::NotFound`] when no page has the key. A title
    /// property stays a title; any other kind is rewritten as rich text.
    /// [`UPDATED_AT_PROPERTY`] is set to the current instant.
    pub async fn append(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
        field_name: &str,
        text: &str,
        position: AppendPosition,
    ) -> Result<PageRef> {
        let _guard = self.guard(database_id, key_property, key_value).await;

        let page = self
            .store
            .find_by_key(database_id, key_property, key_value)
            .await?
            .ok_or_else(|| Error::NotFound {
                key_property: key_property.to_string(),
                key_value: key_value.to_string(),
            })?;

        let (existing, is_title) = match page.properties.get(field_name) {
            Some(PropertyValue::Title(s)) => (s.clone(), true),
            Some(other) => (other.plain_text(), false),
            None => (String::new(), false),
        };

        let combined = position.combine(&existing, text);
        let value = if is_title {
            PropertyValue::Title(combined)
        } else {
            PropertyValue::RichText(combined)
        };

        let properties = Properties::from([
            (field_name.to_string(), value),
            (
                UPDATED_AT_PROPERTY.to_string(),
                PropertyValue::Date(self.now()),
            ),
        ]);

        let page = self.store.update(&page.id, &properties).await?;
        debug!(page_id = %page.id, %field_name, %position, "appended text");

        Ok(page.page_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemDocumentStore, Page};
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use chrononeura_types::MockProvider;
    use pretty_assertions::assert_eq;

    const DB: &str = "devlog-db";

    fn policy() -> UpsertPolicy<Arc<MemDocumentStore>> {
        let clock = MockProvider::new(Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap());
        UpsertPolicy::new(Arc::new(MemDocumentStore::new()), Arc::new(clock))
    }

    fn text(name: &str, value: &str) -> (String, PropertyValue) {
        (name.to_string(), PropertyValue::RichText(value.to_string()))
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_the_same_page() {
        let policy = policy();

        let first = policy
            .upsert(DB, "Key", "k1", Properties::from([text("Summary", "v1")]))
            .await
            .unwrap();
        let second = policy
            .upsert(DB, "Key", "k1", Properties::from([text("Summary", "v2")]))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);

        let pages = policy.store().pages(DB);
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].properties,
            Properties::from([text("Key", "k1"), text("Summary", "v2")])
        );
    }

    #[tokio::test]
    async fn upsert_keeps_a_caller_supplied_key_property() {
        let policy = policy();
        policy
            .upsert(
                DB,
                "Key",
                "k1",
                Properties::from([(
                    "Key".to_string(),
                    PropertyValue::Title("k1".to_string()),
                )]),
            )
            .await
            .unwrap();

        assert_eq!(
            policy.store().pages(DB)[0].properties.get("Key"),
            Some(&PropertyValue::Title("k1".to_string()))
        );
    }

    #[tokio::test]
    async fn append_adds_a_line() {
        let policy = policy();
        policy
            .upsert(DB, "Key", "k1", Properties::from([text("Details", "first line")]))
            .await
            .unwrap();

        let page = policy
            .append(DB, "Key", "k1", "Details", "second line", AppendPosition::Append)
            .await
            .unwrap();

        let stored = policy.store().get(&page.id).unwrap();
        assert_eq!(
            stored.properties.get("Details"),
            Some(&PropertyValue::RichText("first line\nsecond line".to_string()))
        );
        assert_eq!(
            stored.properties.get(UPDATED_AT_PROPERTY),
            Some(&PropertyValue::Date("2025-11-16T09:00:00Z".to_string()))
        );
    }

    #[tokio::test]
    async fn prepend_and_empty_fields() {
        let policy = policy();
        policy
            .upsert(
                DB,
                "Key",
                "k1",
                Properties::from([(
                    "Title".to_string(),
                    PropertyValue::Title("old".to_string()),
                )]),
            )
            .await
            .unwrap();

        let page = policy
            .append(DB, "Key", "k1", "Title", "new", AppendPosition::Prepend)
            .await
            .unwrap();
        policy
            .append(DB, "Key", "k1", "Notes", "only line", AppendPosition::Append)
            .await
            .unwrap();

        let stored = policy.store().get(&page.id).unwrap();
        assert_eq!(
            stored.properties.get("Title"),
            Some(&PropertyValue::Title("new\nold".to_string()))
        );
        assert_eq!(
            stored.properties.get("Notes"),
            Some(&PropertyValue::RichText("only line".to_string()))
        );
    }

    #[tokio::test]
    async fn append_to_a_missing_page_is_not_found() {
        let policy = policy();
        let err = policy
            .append(DB, "Key", "nope", "Details", "x", AppendPosition::Append)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_matches!(err, Error::NotFound { key_value, .. } if key_value == "nope");
        assert!(policy.store().pages(DB).is_empty());
    }

    /// Yields to the scheduler around every store call, so that concurrent
    /// upserts interleave between the lookup and the create.
    #[derive(Debug, Default)]
    struct YieldingStore(MemDocumentStore);

    #[async_trait::async_trait]
    impl DocumentStore for YieldingStore {
        async fn find_by_key(
            &self,
            database_id: &str,
            key_property: &str,
            key_value: &str,
        ) -> Result<Option<Page>> {
            let page = self
                .0
                .find_by_key(database_id, key_property, key_value)
                .await;
            tokio::task::yield_now().await;
            page
        }

        async fn create(&self, database_id: &str, properties: &Properties) -> Result<Page> {
            tokio::task::yield_now().await;
            self.0.create(database_id, properties).await
        }

        async fn update(&self, page_id: &str, properties: &Properties) -> Result<Page> {
            tokio::task::yield_now().await;
            self.0.update(page_id, properties).await
        }
    }

    /// Run eight concurrent upserts of the same new key and return the number
    /// of pages they leave behind.
    async fn concurrent_upserts(policy: UpsertPolicy<YieldingStore>) -> usize {
        let policy = Arc::new(policy);

        let tasks = (0..8)
            .map(|i| {
                let policy = Arc::clone(&policy);
                tokio::spawn(async move {
                    policy
                        .upsert(DB, "Key", "k1", Properties::from([text("N", &i.to_string())]))
                        .await
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        for t in tasks {
            t.await.unwrap();
        }

        policy.store().0.pages(DB).len()
    }

    fn yielding_policy() -> UpsertPolicy<YieldingStore> {
        let clock = MockProvider::new(Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap());
        UpsertPolicy::new(YieldingStore::default(), Arc::new(clock))
    }

    #[tokio::test]
    async fn unserialized_upserts_race() {
        assert!(concurrent_upserts(yielding_policy()).await > 1);
    }

    #[tokio::test]
    async fn serialized_upserts_create_one_page() {
        assert_eq!(
            concurrent_upserts(yielding_policy().with_key_locks()).await,
            1
        );
    }

    #[tokio::test]
    async fn idle_key_locks_are_dropped() {
        let locks = KeyLocks::new();
        {
            let _a = locks.lock("a".to_string()).await;
            let _b = locks.lock("b".to_string()).await;
            assert_eq!(locks.len(), 2);
        }
        let _c = locks.lock("c".to_string()).await;
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn position_parsing() {
        assert_eq!("Prepend".parse::<AppendPosition>(), Ok(AppendPosition::Prepend));
        assert!("middle".parse::<AppendPosition>().is_err());
        assert_eq!(AppendPosition::default().to_string(), "append");
    }
}
