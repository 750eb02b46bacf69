//! Entrypoint for the ChronoNeura ingest server

use std::sync::Arc;

use chrononeura_clap_blocks::{
    influx::InfluxConfig, logging::LoggingConfig, notion::NotionConfig, socket_addr::SocketAddr,
};
use chrononeura_notion::UpsertPolicy;
use chrononeura_server::http::HttpDelegate;
use chrononeura_types::{
    BucketConfigError, PayloadAssembler, SystemProvider, TimeProvider, TimestampPolicy,
};
use hyper::server::conn::AddrIncoming;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The default bind address for the HTTP API.
pub(crate) const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("invalid bucket configuration: {0}")]
    Buckets(#[from] BucketConfigError),

    #[error("cannot create InfluxDB client: {0}")]
    InfluxClient(#[from] chrononeura_influx::Error),

    #[error("cannot create Notion client: {0}")]
    NotionClient(#[from] chrononeura_notion::Error),

    #[error("failed to bind address {addr}: {source}")]
    BindAddress {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("server error: {0}")]
    Server(#[source] hyper::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// time-series store options
    #[clap(flatten)]
    influx_config: InfluxConfig,

    /// document store options
    #[clap(flatten)]
    notion_config: NotionConfig,

    /// The address on which the server listens for HTTP API requests.
    #[clap(
        long = "http-bind",
        env = "CHRONONEURA_HTTP_BIND_ADDR",
        default_value = DEFAULT_HTTP_BIND_ADDR,
        action,
    )]
    http_bind_address: SocketAddr,

    /// Maximum size of HTTP requests, after decompression.
    #[clap(
        long = "max-http-request-size",
        env = "CHRONONEURA_MAX_HTTP_REQUEST_SIZE",
        default_value = "10485760", // 10 MiB
        action,
    )]
    max_http_request_size: usize,

    /// What to do with payload timestamps.
    ///
    /// pass-through: send the client's timestamp as given, or none at all
    ///
    /// canonicalize: rewrite to RFC3339 UTC, stamping the current time when
    /// the timestamp is missing or unparsable
    #[clap(
        long = "timestamp-policy",
        env = "CHRONONEURA_TIMESTAMP_POLICY",
        default_value = "pass-through",
        verbatim_doc_comment,
        action
    )]
    timestamp_policy: TimestampPolicy,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let buckets = config.influx_config.bucket_selector()?;
    let store = config.influx_config.client()?;
    let notion = config.notion_config.client()?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());

    let mut documents = UpsertPolicy::new(notion, Arc::clone(&time_provider));
    if config.notion_config.serialize_upserts {
        documents = documents.with_key_locks();
    }

    let delegate = Arc::new(HttpDelegate::new(
        config.max_http_request_size,
        store,
        buckets,
        PayloadAssembler::new(config.timestamp_policy, time_provider),
        Arc::new(documents),
        config.notion_config.devlog_database_id.as_str(),
    ));

    let addr = AddrIncoming::bind(&config.http_bind_address).map_err(|source| {
        Error::BindAddress {
            addr: config.http_bind_address,
            source,
        }
    })?;

    info!(
        address = %addr.local_addr(),
        influx_url = %config.influx_config.url,
        prod_bucket = %config.influx_config.bucket,
        sandbox_bucket = %config.influx_config.bucket_sandbox,
        timestamp_policy = %config.timestamp_policy,
        serialize_upserts = config.notion_config.serialize_upserts,
        "listening for HTTP requests"
    );

    // Construct a token to trigger clean shutdown
    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.cancel();
    });

    chrononeura_server::serve(addr, delegate, shutdown)
        .await
        .map_err(Error::Server)?;

    info!("server shut down");
    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut term), Ok(mut int)) => tokio::select! {
            _ = term.recv() => info!("Received SIGTERM"),
            _ = int.recv() => info!("Received SIGINT"),
        },
        (Err(e), _) | (_, Err(e)) => {
            warn!(%e, "cannot register signal handlers, waiting for ctrl-c instead");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        }
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}
