//! An in-memory [`DocumentStore`], used by tests and for running the service
//! without Notion credentials.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use uuid::Uuid;

use crate::{DocumentStore, Error, Page, PropertyValue, Result, property::Properties};

#[derive(Debug)]
struct StoredPage {
    database_id: String,
    page: Page,
}

/// Pages are kept in creation order; key lookups return the oldest match.
#[derive(Debug, Default)]
pub struct MemDocumentStore {
    pages: Mutex<Vec<StoredPage>>,
}

impl MemDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pages in `database_id`, oldest first.
    pub fn pages(&self, database_id: &str) -> Vec<Page> {
        self.pages
            .lock()
            .iter()
            .filter(|p| p.database_id == database_id)
            .map(|p| p.page.clone())
            .collect()
    }

    pub fn get(&self, page_id: &str) -> Option<Page> {
        self.pages
            .lock()
            .iter()
            .find(|p| p.page.id == page_id)
            .map(|p| p.page.clone())
    }
}

#[async_trait]
impl DocumentStore for MemDocumentStore {
    async fn find_by_key(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
    ) -> Result<Option<Page>> {
        Ok(self
            .pages
            .lock()
            .iter()
            .filter(|p| p.database_id == database_id)
            .find(|p| {
                matches!(
                    p.page.properties.get(key_property),
                    Some(PropertyValue::RichText(v) | PropertyValue::Title(v)) if v == key_value
                )
            })
            .map(|p| p.page.clone()))
    }

    async fn create(&self, database_id: &str, properties: &Properties) -> Result<Page> {
        let id = Uuid::new_v4().to_string();
        let page = Page {
            url: Some(format!("https://www.notion.so/{}", id.replace('-', ""))),
            id,
            properties: properties.clone(),
        };

        self.pages.lock().push(StoredPage {
            database_id: database_id.to_string(),
            page: page.clone(),
        });

        Ok(page)
    }

    async fn update(&self, page_id: &str, properties: &Properties) -> Result<Page> {
        let mut pages = self.pages.lock();
        let stored = pages
            .iter_mut()
            .find(|p| p.page.id == page_id)
            .ok_or_else(|| Error::ApiError {
                code: StatusCode::NOT_FOUND,
                message: format!("Could not find page with ID: {page_id}"),
            })?;

        stored.page.properties.extend(properties.clone());
        Ok(stored.page.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::RichText(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn create_find_update() {
        let store = MemDocumentStore::new();

        let created = store
            .create("db", &props(&[("Key", "k1"), ("Details", "a")]))
            .await
            .unwrap();
        store
            .create("other-db", &props(&[("Key", "k1")]))
            .await
            .unwrap();

        let found = store.find_by_key("db", "Key", "k1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(store.find_by_key("db", "Key", "k2").await.unwrap(), None);
        assert_eq!(store.find_by_key("db", "Details", "k1").await.unwrap(), None);

        let updated = store
            .update(&created.id, &props(&[("Details", "b")]))
            .await
            .unwrap();
        assert_eq!(updated.properties, props(&[("Key", "k1"), ("Details", "b")]));
        assert_eq!(store.get(&created.id), Some(updated));
        assert_eq!(store.pages("db").len(), 1);
    }

    #[tokio::test]
    async fn unknown_pages_cannot_be_updated() {
        let store = MemDocumentStore::new();
        assert_matches!(
            store.update("nope", &props(&[])).await,
            Err(Error::ApiError {
                code: StatusCode::NOT_FOUND,
                ..
            })
        );
    }
}
