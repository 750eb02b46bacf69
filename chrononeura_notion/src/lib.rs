//! The document-store side of ChronoNeura: typed Notion page properties, a
//! [`DocumentStore`] abstraction with an HTTP and an in-memory
//! implementation, and the upsert/append policy the devlog endpoints use.
//!
//! ```text
//!   key ──▶ find_by_key ──┬── found ──▶ update(page id)
//!                         └── none  ──▶ create(database id)
//! ```

pub mod client;
pub mod devlog;
pub mod mem;
pub mod policy;
pub mod property;

use std::fmt::Debug;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;

pub use client::Client;
pub use devlog::{DevlogEntry, DevlogMode, DevlogWriter, TitleBuilder};
pub use mem::MemDocumentStore;
pub use policy::{AppendPosition, KeyLocks, UPDATED_AT_PROPERTY, UpsertPolicy};
pub use property::{Properties, PropertyValue};

/// Errors returned by document stores and the policies built on them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("unexpected response from the document store: {0}")]
    InvalidResponse(String),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no page with {key_property} = '{key_value}'")]
    NotFound {
        key_property: String,
        key_value: String,
    },

    #[error("a non-empty 'key' is required in {0} mode")]
    MissingKey(DevlogMode),

    #[error("'append' text is required in append mode")]
    MissingAppendText,
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// The key lookup matched no page.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The request itself was unusable; retrying it unchanged cannot succeed.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::MissingKey(_) | Self::MissingAppendText)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A page as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: String,
    pub url: Option<String>,
    pub properties: Properties,
}

impl Page {
    pub fn page_ref(&self) -> PageRef {
        PageRef {
            id: self.id.clone(),
            url: self.url.clone(),
        }
    }
}

/// The identity of a page, returned to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub id: String,
    pub url: Option<String>,
}

/// The document-store collaborator.
#[async_trait]
pub trait DocumentStore: Debug + Send + Sync + 'static {
    /// Find the page in `database_id` whose `key_property` equals
    /// `key_value` exactly.
    async fn find_by_key(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
    ) -> Result<Option<Page>>;

    /// Create a page in `database_id`.
    async fn create(&self, database_id: &str, properties: &Properties) -> Result<Page>;

    /// Overwrite the given properties of `page_id`, leaving the others alone.
    async fn update(&self, page_id: &str, properties: &Properties) -> Result<Page>;
}

#[async_trait]
impl<T> DocumentStore for std::sync::Arc<T>
where
    T: DocumentStore,
{
    async fn find_by_key(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
    ) -> Result<Option<Page>> {
        (**self)
            .find_by_key(database_id, key_property, key_value)
            .await
    }

    async fn create(&self, database_id: &str, properties: &Properties) -> Result<Page> {
        (**self).create(database_id, properties).await
    }

    async fn update(&self, page_id: &str, properties: &Properties) -> Result<Page> {
        (**self).update(page_id, properties).await
    }
}
