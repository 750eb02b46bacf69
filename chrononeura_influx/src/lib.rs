//! InfluxDB v2 HTTP client and the [`TimeSeriesStore`] abstraction the
//! ingest service writes through.
//!
//! ```text
//!   NormalizedRecord ──► DataPoint (line protocol) ──► POST /api/v2/write
//!   Query ──► Flux ──► POST /api/v2/query ──► CSV ──► Vec<Row>
//! ```

pub mod line_protocol;
pub mod mock;
pub mod query;

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use chrononeura_types::NormalizedRecord;
use reqwest::{IntoUrl, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use tracing::debug;
use url::Url;

pub use chrononeura_types::Precision;
pub use line_protocol::DataPoint;
pub use query::{Query, RangeQuery, Row};

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid timestamp '{0}': expected RFC3339, ISO-8601 or an integer epoch")]
    InvalidTimestamp(String),

    #[error("timestamp '{0}' cannot be represented at the requested precision")]
    TimestampOutOfRange(String),

    #[error("invalid range bound '{0}': expected a duration literal, now() or RFC3339")]
    InvalidRangeBound(String),

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("failed to decode query result: {0}")]
    Csv(#[from] csv::Error),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// Whether the error was caused by the caller's input rather than by the
    /// store.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimestamp(_)
                | Self::TimestampOutOfRange(_)
                | Self::InvalidRangeBound(_)
                | Self::EmptyQuery
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The time-series storage collaborator.
///
/// The ingest service only ever hands it an already-normalized record and a
/// bucket name; any failure is surfaced to the client as a server error.
#[async_trait]
pub trait TimeSeriesStore: Debug + Send + Sync + 'static {
    /// Write one point to `bucket`.
    async fn write_point(
        &self,
        bucket: &str,
        record: &NormalizedRecord,
        precision: Precision,
    ) -> Result<()>;

    /// Run `query` against `bucket`, returning one [`Row`] per result record.
    async fn query(&self, bucket: &str, query: &Query) -> Result<Vec<Row>>;

    /// Check that the store is reachable and healthy.
    async fn health(&self) -> Result<()>;
}

#[async_trait]
impl<T> TimeSeriesStore for std::sync::Arc<T>
where
    T: TimeSeriesStore,
{
    async fn write_point(
        &self,
        bucket: &str,
        record: &NormalizedRecord,
        precision: Precision,
    ) -> Result<()> {
        (**self).write_point(bucket, record, precision).await
    }

    async fn query(&self, bucket: &str, query: &Query) -> Result<Vec<Row>> {
        (**self).query(bucket, query).await
    }

    async fn health(&self) -> Result<()> {
        (**self).health().await
    }
}

/// Client for the InfluxDB v2 HTTP API.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL of the InfluxDB server
    base_url: Url,
    /// Organization every request is scoped to
    org: String,
    /// The `Token` credential sent with each request
    auth_token: Option<Secret<String>>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`]
    pub fn new<U: IntoUrl>(base_url: U, org: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            org: org.into(),
            auth_token: None,
            http_client: reqwest::Client::new(),
        })
    }

    /// Set the token that will be sent with each request to the server
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
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

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.http_client.request(method, url);
        match &self.auth_token {
            Some(token) => req.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", token.expose_secret()),
            ),
            None => req,
        }
    }

    /// Make a request to the `POST /api/v2/write` API with a line protocol
    /// body.
    pub async fn write_line_protocol(
        &self,
        bucket: &str,
        precision: Precision,
        body: impl Into<String> + Send,
    ) -> Result<()> {
        let url = self.base_url.join("/api/v2/write")?;

        let resp = self
            .request(Method::POST, url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", precision.as_query_param()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.into())
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, "/api/v2/write", src))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::ApiError {
                code: status,
                message: resp.text().await.map_err(Error::Text)?,
            })
        }
    }

    /// Render `record` as line protocol and write it to `bucket`.
    pub async fn write_record(
        &self,
        bucket: &str,
        record: &NormalizedRecord,
        precision: Precision,
    ) -> Result<()> {
        let line = DataPoint::new(record, precision)?.to_string();
        debug!(%bucket, %line, "writing point");
        self.write_line_protocol(bucket, precision, line).await
    }

    /// Make a request to the `POST /api/v2/query` API and decode the CSV
    /// response into rows.
    pub async fn query_flux(&self, flux: &str) -> Result<Vec<Row>> {
        #[derive(Serialize)]
        struct Dialect {
            header: bool,
            annotations: [&'static str; 0],
        }

        #[derive(Serialize)]
        struct Req<'a> {
            query: &'a str,
            #[serde(rename = "type")]
            kind: &'static str,
            dialect: Dialect,
        }

        let url = self.base_url.join("/api/v2/query")?;

        let resp = self
            .request(Method::POST, url)
            .query(&[("org", self.org.as_str())])
            .header(reqwest::header::ACCEPT, "application/csv")
            .json(&Req {
                query: flux,
                kind: "flux",
                dialect: Dialect {
                    header: true,
                    annotations: [],
                },
            })
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, "/api/v2/query", src))?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Text)?;
        if !status.is_success() {
            return Err(Error::ApiError {
                code: status,
                message: body,
            });
        }

        query::parse_csv(&body)
    }

    /// Make a request to the `GET /health` API
    pub async fn ping(&self) -> Result<()> {
        let url = self.base_url.join("/health")?;

        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, "/health", src))?;

        let status = resp.status();
        match status {
            StatusCode::OK => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }
}

#[async_trait]
impl TimeSeriesStore for Client {
    async fn write_point(
        &self,
        bucket: &str,
        record: &NormalizedRecord,
        precision: Precision,
    ) -> Result<()> {
        self.write_record(bucket, record, precision).await
    }

    async fn query(&self, bucket: &str, query: &Query) -> Result<Vec<Row>> {
        let flux = query.to_flux(bucket)?;
        self.query_flux(&flux).await
    }

    async fn health(&self) -> Result<()> {
        self.ping().await
    }
}
