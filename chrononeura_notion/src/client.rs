//! [`DocumentStore`] backed by the Notion REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{IntoUrl, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::property::{Properties, from_notion_properties, to_notion_properties};
use crate::{DocumentStore, Error, Page, Result};

/// The `Notion-Version` header sent when none is configured.
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

/// Client for the Notion pages and databases APIs.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL, normally `https://api.notion.com`
    base_url: Url,
    /// Integration token, sent as a `Bearer` credential
    auth_token: Secret<String>,
    /// Value of the `Notion-Version` header
    version: String,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`]
    pub fn new<U: IntoUrl>(base_url: U, auth_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            auth_token: Secret::new(auth_token.into()),
            version: DEFAULT_NOTION_VERSION.to_string(),
            http_client: reqwest::Client::new(),
        })
    }

    /// Override the `Notion-Version` header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Bound every request made by this client to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Build)?;
        Ok(self)
    }

    async fn send(&self, method: Method, path: &str, body: &Value) -> Result<Value> {
        let url = self.base_url.join(path)?;

        let resp = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(self.auth_token.expose_secret())
            .header("Notion-Version", &self.version)
            .json(body)
            .send()
            .await
            .map_err(|src| Error::request_send(method, path, src))?;

        let status = resp.status();
        match status {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }
}

fn parse_page(value: &Value) -> Result<Page> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidResponse("page has no id".to_string()))?;

    Ok(Page {
        id: id.to_string(),
        url: value.get("url").and_then(Value::as_str).map(ToString::to_string),
        properties: value
            .get("properties")
            .map(from_notion_properties)
            .unwrap_or_default(),
    })
}

#[async_trait]
impl DocumentStore for Client {
    async fn find_by_key(
        &self,
        database_id: &str,
        key_property: &str,
        key_value: &str,
    ) -> Result<Option<Page>> {
        let path = format!("/v1/databases/{database_id}/query");
        let body = json!({
            "filter": {
                "property": key_property,
                "rich_text": { "equals": key_value },
            },
            "page_size": 2,
        });

        let resp = self.send(Method::POST, &path, &body).await?;
        let results = resp
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidResponse("query response has no results".to_string()))?;

        if results.len() > 1 {
            warn!(
                %database_id,
                %key_property,
                %key_value,
                "more than one page matches key, using the first"
            );
        }

        results.first().map(parse_page).transpose()
    }

    async fn create(&self, database_id: &str, properties: &Properties) -> Result<Page> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": to_notion_properties(properties),
        });

        let page = parse_page(&self.send(Method::POST, "/v1/pages", &body).await?)?;
        debug!(page_id = %page.id, %database_id, "created page");
        Ok(page)
    }

    async fn update(&self, page_id: &str, properties: &Properties) -> Result<Page> {
        let path = format!("/v1/pages/{page_id}");
        let body = json!({ "properties": to_notion_properties(properties) });

        let page = parse_page(&self.send(Method::PATCH, &path, &body).await?)?;
        debug!(page_id = %page.id, "updated page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PropertyValue;
    use assert_matches::assert_matches;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    const TOKEN: &str = "secret_notion_token";

    fn page_json(id: &str, key: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "url": format!("https://www.notion.so/{id}"),
            "properties": {
                "Key": {"id": "k", "type": "rich_text", "rich_text": [
                    {"type": "text", "plain_text": key, "text": {"content": key}}
                ]},
            },
        })
    }

    #[tokio::test]
    async fn find_by_key() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/v1/databases/db1/query")
            .match_header("Authorization", format!("Bearer {TOKEN}").as_str())
            .match_header("Notion-Version", DEFAULT_NOTION_VERSION)
            .match_body(Matcher::Json(json!({
                "filter": {"property": "Key", "rich_text": {"equals": "k1"}},
                "page_size": 2,
            })))
            .with_status(200)
            .with_body(json!({"object": "list", "results": [page_json("p1", "k1")]}).to_string())
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN).expect("create client");
        let page = client
            .find_by_key("db1", "Key", "k1")
            .await
            .expect("query")
            .expect("page exists");

        assert_eq!(page.id, "p1");
        assert_eq!(page.url.as_deref(), Some("https://www.notion.so/p1"));
        assert_eq!(
            page.properties.get("Key"),
            Some(&PropertyValue::RichText("k1".to_string()))
        );

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_by_key_without_matches() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/v1/databases/db1/query")
            .with_status(200)
            .with_body(r#"{"object": "list", "results": []}"#)
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN).expect("create client");
        assert_eq!(client.find_by_key("db1", "Key", "k1").await.unwrap(), None);

        mock.assert_async().await;
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_keys_use_the_first_page() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/v1/databases/db1/query")
            .with_status(200)
            .with_body(
                json!({"results": [page_json("p1", "k1"), page_json("p2", "k1")]}).to_string(),
            )
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN).expect("create client");
        let page = client.find_by_key("db1", "Key", "k1").await.unwrap();
        assert_eq!(page.map(|p| p.id), Some("p1".to_string()));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_page() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/v1/pages")
            .match_header("Notion-Version", "2025-09-03")
            .match_body(Matcher::Json(json!({
                "parent": {"database_id": "db1"},
                "properties": {
                    "Key": {"rich_text": [{"type": "text", "text": {"content": "k1"}}]},
                    "Tags": {"multi_select": [{"name": "dev"}]},
                },
            })))
            .with_status(200)
            .with_body(page_json("p1", "k1").to_string())
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN)
            .expect("create client")
            .with_version("2025-09-03");

        let props = Properties::from([
            ("Key".to_string(), PropertyValue::RichText("k1".to_string())),
            (
                "Tags".to_string(),
                PropertyValue::MultiSelect(vec!["dev".to_string()]),
            ),
        ]);
        let page = client.create("db1", &props).await.expect("create");
        assert_eq!(page.id, "p1");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn update_page() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("PATCH", "/v1/pages/p1")
            .match_body(Matcher::Json(json!({
                "properties": {"Done": {"checkbox": true}},
            })))
            .with_status(200)
            .with_body(page_json("p1", "k1").to_string())
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN).expect("create client");
        let props = Properties::from([("Done".to_string(), PropertyValue::Checkbox(true))]);
        let page = client.update("p1", &props).await.expect("update");
        assert_eq!(page.id, "p1");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_errors() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("PATCH", "/v1/pages/p1")
            .with_status(400)
            .with_body(r#"{"object":"error","status":400,"code":"validation_error","message":"Done is not a property that exists."}"#)
            .create_async()
            .await;

        let client = Client::new(mock_server.url(), TOKEN).expect("create client");
        let props = Properties::from([("Done".to_string(), PropertyValue::Checkbox(true))]);

        assert_matches!(
            client.update("p1", &props).await,
            Err(Error::ApiError { code: StatusCode::BAD_REQUEST, message }) => {
                assert!(message.contains("validation_error"));
            }
        );

        mock.assert_async().await;
    }
}
