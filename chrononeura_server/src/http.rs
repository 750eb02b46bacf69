//! HTTP request routing and handlers.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrononeura_influx::{Precision, Query, RangeQuery, TimeSeriesStore};
use chrononeura_notion::{
    AppendPosition, DevlogEntry, DevlogWriter, DocumentStore, PageRef, Properties, UpsertPolicy,
    devlog::{DETAILS_PROPERTY, KEY_PROPERTY},
};
use chrononeura_types::{
    BucketSelector, Mode, PayloadAssembler, RawPayload, ValidationError, normalize_key,
};
use futures::StreamExt;
use hyper::{
    Body, Method, Request, Response, StatusCode,
    header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderValue, ToStrError},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

const BANNER: &str = "ChronoNeura Ingest Server — mode-switch enabled";

/// Every path with a handler, used to tell a wrong method from an unknown
/// path.
const ROUTES: &[&str] = &[
    "/",
    "/health",
    "/health/ready",
    "/health/influx",
    "/ingest",
    "/ingest/sandbox",
    "/ingest/prod",
    "/query",
    "/devlog/upsert",
    "/devlog/append",
    "/notion/devlog",
];

/// Errors returned by the [`HttpDelegate`].
#[derive(Debug, Error)]
pub enum Error {
    /// The requested path has no registered handler.
    #[error("not found")]
    NoHandler,

    /// The path exists but does not accept this method.
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    /// The `Content-Encoding` header is invalid and cannot be read.
    #[error("invalid content-encoding header: {0}")]
    NonUtf8ContentHeader(ToStrError),

    /// The specified `Content-Encoding` is not acceptable.
    #[error("unacceptable content-encoding: {0}")]
    InvalidContentEncoding(String),

    /// The client disconnected.
    #[error("client disconnected")]
    ClientHangup(hyper::Error),

    /// The client sent a request body that exceeds the configured maximum.
    #[error("max request size ({0} bytes) exceeded")]
    RequestSizeExceeded(usize),

    /// Decoding a gzip-compressed stream of data failed.
    #[error("error decoding gzip stream: {0}")]
    InvalidGzip(std::io::Error),

    #[error("invalid JSON body: {0}")]
    InvalidJson(serde_json::Error),

    #[error("invalid query string: {0}")]
    InvalidQueryString(#[from] serde_urlencoded::de::Error),

    #[error("{0}")]
    InvalidPrecision(String),

    /// The ingest payload cannot be normalized.
    #[error(transparent)]
    InvalidPayload(#[from] ValidationError),

    #[error("'{0}' must not be empty")]
    MissingField(&'static str),

    #[error("either 'q' or 'measurement' is required")]
    MissingQuery,

    #[error("time-series store error: {0}")]
    TimeSeriesStore(#[from] chrononeura_influx::Error),

    #[error("document store error: {0}")]
    DocumentStore(#[from] chrononeura_notion::Error),

    /// The health probe of the time-series store failed.
    #[error("time-series store unavailable: {0}")]
    StoreUnavailable(chrononeura_influx::Error),
}

impl Error {
    /// Convert the error into an appropriate [`StatusCode`] to be returned to
    /// the end user.
    pub fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NoHandler => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::NonUtf8ContentHeader(_) => StatusCode::BAD_REQUEST,
            Self::InvalidContentEncoding(_) => {
                // https://www.rfc-editor.org/rfc/rfc7231#section-6.5.13
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::ClientHangup(_) => StatusCode::BAD_REQUEST,
            Self::RequestSizeExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidGzip(_) => StatusCode::BAD_REQUEST,
            Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::InvalidQueryString(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPrecision(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::MissingQuery => StatusCode::BAD_REQUEST,
            Self::TimeSeriesStore(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            Self::TimeSeriesStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DocumentStore(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::DocumentStore(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            Self::DocumentStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the failure is on the server side rather than the client's.
    pub fn is_internal(&self) -> bool {
        self.as_status_code().is_server_error()
    }

    /// Render the error as a JSON response with a machine-readable `code` and
    /// a human-readable `message`.
    pub fn response(&self) -> Response<Body> {
        let status = self.as_status_code();
        json_response(
            status,
            &json!({
                "code": error_code(status),
                "message": self.to_string(),
            }),
        )
    }
}

fn error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid",
        StatusCode::NOT_FOUND => "not found",
        StatusCode::METHOD_NOT_ALLOWED => "method not allowed",
        StatusCode::PAYLOAD_TOO_LARGE => "request too large",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported media type",
        StatusCode::SERVICE_UNAVAILABLE => "unavailable",
        _ => "internal error",
    }
}

/// Query string of the ingest endpoints.
#[derive(Debug, Deserialize)]
struct WriteParams {
    mode: Option<String>,
    bucket: Option<String>,
    precision: Option<String>,
}

impl WriteParams {
    fn precision(&self) -> Result<Precision, Error> {
        self.precision
            .as_deref()
            .map(str::parse::<Precision>)
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(Error::InvalidPrecision)
    }
}

/// Parameters of `/query`, from the query string (`GET`) or a JSON body
/// (`POST`).
#[derive(Debug, Deserialize)]
struct QueryParams {
    q: Option<String>,
    measurement: Option<String>,
    start: Option<String>,
    stop: Option<String>,
    limit: Option<usize>,
    mode: Option<String>,
    bucket: Option<String>,
}

impl QueryParams {
    /// A raw `q` wins over a measurement range.
    fn query(&self) -> Result<Query, Error> {
        if let Some(q) = non_empty(self.q.as_deref()) {
            return Ok(Query::Raw(q.to_string()));
        }

        let measurement = non_empty(self.measurement.as_deref()).ok_or(Error::MissingQuery)?;
        Ok(Query::Range(RangeQuery {
            measurement: normalize_key(measurement),
            start: non_empty(self.start.as_deref())
                .unwrap_or(RangeQuery::DEFAULT_START)
                .to_string(),
            stop: non_empty(self.stop.as_deref()).map(ToString::to_string),
            limit: self.limit,
        }))
    }
}

fn default_key_property() -> String {
    KEY_PROPERTY.to_string()
}

fn default_append_to() -> String {
    DETAILS_PROPERTY.to_string()
}

/// Body of `/devlog/upsert`.
#[derive(Debug, Deserialize)]
struct UpsertRequest {
    /// Defaults to the devlog database.
    database_id: Option<String>,
    #[serde(default = "default_key_property")]
    key_property: String,
    key: String,
    #[serde(default)]
    properties: Properties,
}

/// Body of `/devlog/append`.
#[derive(Debug, Deserialize)]
struct AppendRequest {
    database_id: Option<String>,
    #[serde(default = "default_key_property")]
    key_property: String,
    #[serde(alias = "Key")]
    key: String,
    #[serde(default = "default_append_to")]
    append_to: String,
    text: String,
    #[serde(default)]
    position: AppendPosition,
}

/// This type is responsible for servicing requests to the ChronoNeura HTTP
/// API.
#[derive(Debug)]
pub struct HttpDelegate<T, D> {
    max_request_bytes: usize,
    store: T,
    buckets: BucketSelector,
    assembler: PayloadAssembler,
    documents: Arc<UpsertPolicy<D>>,
    devlog: DevlogWriter<D>,
}

impl<T, D> HttpDelegate<T, D>
where
    T: TimeSeriesStore,
    D: DocumentStore,
{
    /// Initialise a new [`HttpDelegate`] writing points to `store` and pages
    /// through `documents`.
    ///
    /// HTTP request bodies are limited to `max_request_bytes` in size,
    /// returning an error if exceeded.
    pub fn new(
        max_request_bytes: usize,
        store: T,
        buckets: BucketSelector,
        assembler: PayloadAssembler,
        documents: Arc<UpsertPolicy<D>>,
        devlog_database_id: impl Into<String>,
    ) -> Self {
        let devlog = DevlogWriter::new(Arc::clone(&documents), devlog_database_id);
        Self {
            max_request_bytes,
            store,
            buckets,
            assembler,
            documents,
            devlog,
        }
    }

    /// Routes `req` to the appropriate handler, if any, returning the handler
    /// response.
    pub async fn route(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/") => Ok(json_response(
                StatusCode::OK,
                &json!({"status": "ok", "message": BANNER}),
            )),
            (&Method::GET, "/health") => Ok(status_response("ok")),
            (&Method::GET, "/health/ready") => Ok(status_response("ready")),
            (&Method::GET, "/health/influx") => self.store_health().await,
            (&Method::POST, "/ingest") => self.ingest(req, None).await,
            (&Method::POST, "/ingest/sandbox") => self.ingest(req, Some(Mode::Sandbox)).await,
            (&Method::POST, "/ingest/prod") => self.ingest(req, Some(Mode::Prod)).await,
            (&Method::GET | &Method::POST, "/query") => self.query(req).await,
            (&Method::POST, "/devlog/upsert") => self.devlog_upsert(req).await,
            (&Method::POST, "/devlog/append") => self.devlog_append(req).await,
            (&Method::POST, "/notion/devlog") => self.notion_devlog(req).await,
            (method, path) if ROUTES.contains(&path) => {
                Err(Error::MethodNotAllowed(method.clone()))
            }
            _ => Err(Error::NoHandler),
        }
    }

    async fn store_health(&self) -> Result<Response<Body>, Error> {
        self.store
            .health()
            .await
            .map_err(Error::StoreUnavailable)?;
        Ok(status_response("ok"))
    }

    /// Normalize one payload and write it.
    ///
    /// The mode fixed by the path wins over the `mode` query parameter, which
    /// wins over the body's `mode`. An explicit bucket (query parameter, then
    /// body) wins over any mode.
    async fn ingest(
        &self,
        req: Request<Body>,
        path_mode: Option<Mode>,
    ) -> Result<Response<Body>, Error> {
        let params: WriteParams = query_params(&req)?;
        let precision = params.precision()?;

        let body = self.read_body(req).await?;
        let raw = RawPayload::try_from(parse_json::<Value>(&body)?)?;
        let record = self.assembler.assemble_with_precision(&raw, precision)?;

        let mode = path_mode
            .map(|m| m.as_str())
            .or(non_empty(params.mode.as_deref()))
            .or(raw.mode());
        let body_bucket = raw.bucket()?;
        let bucket = self
            .buckets
            .select(mode, non_empty(params.bucket.as_deref()).or(body_bucket));

        debug!(
            %bucket,
            measurement = %record.measurement,
            ?mode,
            ?precision,
            "writing point"
        );
        self.store.write_point(bucket, &record, precision).await?;

        Ok(json_response(
            StatusCode::OK,
            &json!({
                "status": "ok",
                "bucket": bucket,
                "normalized": record,
            }),
        ))
    }

    async fn query(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let params: QueryParams = if *req.method() == Method::POST {
            parse_json(&self.read_body(req).await?)?
        } else {
            query_params(&req)?
        };

        let query = params.query()?;
        let bucket = self.buckets.select(
            params.mode.as_deref(),
            non_empty(params.bucket.as_deref()),
        );
        let flux = query.to_flux(bucket)?;

        debug!(%bucket, %flux, "running query");
        let results = self.store.query(bucket, &query).await?;

        Ok(json_response(
            StatusCode::OK,
            &json!({
                "bucket": bucket,
                "query": flux,
                "results": results,
            }),
        ))
    }

    async fn devlog_upsert(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let request: UpsertRequest = parse_json(&self.read_body(req).await?)?;
        let key = non_empty(Some(request.key.as_str())).ok_or(Error::MissingField("key"))?;
        let database_id = request
            .database_id
            .as_deref()
            .unwrap_or(self.devlog.database_id());

        let page = self
            .documents
            .upsert(database_id, &request.key_property, key, request.properties)
            .await?;

        Ok(page_response("ok", page, json!({})))
    }

    async fn devlog_append(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let request: AppendRequest = parse_json(&self.read_body(req).await?)?;
        let key = non_empty(Some(request.key.as_str())).ok_or(Error::MissingField("key"))?;
        if request.text.is_empty() {
            return Err(Error::MissingField("text"));
        }
        let database_id = request
            .database_id
            .as_deref()
            .unwrap_or(self.devlog.database_id());

        let page = self
            .documents
            .append(
                database_id,
                &request.key_property,
                key,
                &request.append_to,
                &request.text,
                request.position,
            )
            .await?;

        Ok(page_response(
            "ok",
            page,
            json!({
                "append_to": request.append_to,
                "added_text": request.text,
            }),
        ))
    }

    async fn notion_devlog(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let entry: DevlogEntry = parse_json(&self.read_body(req).await?)?;
        let page = self.devlog.write(&entry).await?;
        info!(mode = %entry.mode, page_id = %page.id, "wrote devlog entry");

        Ok(page_response("success", page, json!({})))
    }

    /// Parse the request's body into raw bytes, applying the configured size
    /// limits and decoding any content encoding.
    async fn read_body(&self, req: Request<Body>) -> Result<Bytes, Error> {
        let encoding = req
            .headers()
            .get(&CONTENT_ENCODING)
            .map(|v| v.to_str().map_err(Error::NonUtf8ContentHeader))
            .transpose()?;
        let ungzip = match encoding {
            None | Some("identity") => false,
            Some("gzip") => true,
            Some(v) => return Err(Error::InvalidContentEncoding(v.to_string())),
        };

        let mut payload = req.into_body();

        let mut body = BytesMut::new();
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(Error::ClientHangup)?;
            // limit max size of in-memory payload
            if (body.len() + chunk.len()) > self.max_request_bytes {
                return Err(Error::RequestSizeExceeded(self.max_request_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        if !ungzip {
            return Ok(body);
        }

        use std::io::Read;
        let decoder = flate2::read::GzDecoder::new(&body[..]);

        // Read at most max_request_bytes bytes to prevent a decompression bomb
        // based DoS. One extra byte is read to tell a stream that fits from a
        // truncated one.
        let mut decoder = decoder.take(self.max_request_bytes as u64 + 1);
        let mut decoded_data = Vec::new();
        decoder
            .read_to_end(&mut decoded_data)
            .map_err(Error::InvalidGzip)?;

        if decoded_data.len() > self.max_request_bytes {
            return Err(Error::RequestSizeExceeded(self.max_request_bytes));
        }

        Ok(decoded_data.into())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

fn query_params<P: DeserializeOwned>(req: &Request<Body>) -> Result<P, Error> {
    Ok(serde_urlencoded::from_str(
        req.uri().query().unwrap_or_default(),
    )?)
}

fn parse_json<P: DeserializeOwned>(body: &[u8]) -> Result<P, Error> {
    serde_json::from_slice(body).map_err(Error::InvalidJson)
}

fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn status_response(status: &str) -> Response<Body> {
    json_response(StatusCode::OK, &json!({ "status": status }))
}

/// `{"status", "page_id", "url"}` plus the members of `extra`.
fn page_response(status: &str, page: PageRef, extra: Value) -> Response<Body> {
    let mut body = json!({
        "status": status,
        "page_id": page.id,
        "url": page.url,
    });
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    json_response(StatusCode::OK, &body)
}
