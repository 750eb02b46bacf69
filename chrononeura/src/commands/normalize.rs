//! Run the payload assembler offline, to see what a payload would be written
//! as without touching the network.

use std::{path::PathBuf, sync::Arc};

use chrononeura_influx::{DataPoint, Precision};
use chrononeura_types::{
    PayloadAssembler, RawPayload, SystemProvider, TimeProvider, TimestampPolicy, ValidationError,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("cannot read {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("cannot render line protocol: {0}")]
    LineProtocol(#[from] chrononeura_influx::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// File holding the JSON payload. Reads stdin when omitted.
    #[clap(short = 'f', long = "file", action)]
    file: Option<PathBuf>,

    /// What to do with the payload timestamp, as for `serve`.
    #[clap(
        long = "timestamp-policy",
        env = "CHRONONEURA_TIMESTAMP_POLICY",
        default_value = "pass-through",
        action
    )]
    timestamp_policy: TimestampPolicy,

    /// Print the line protocol that would be written instead of the
    /// normalized record.
    #[clap(long = "line-protocol", action = clap::ArgAction::SetTrue)]
    line_protocol: bool,

    /// Units of integer timestamps: ns, us, ms or s.
    #[clap(long = "precision", default_value = "ns", action)]
    precision: Precision,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let input = match &config.file {
        Some(path) => tokio::fs::read(path).await.map_err(|source| Error::Read {
            source_name: path.display().to_string(),
            source,
        })?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .map_err(|source| Error::Read {
                    source_name: "stdin".to_string(),
                    source,
                })?;
            buf
        }
    };

    let clock: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
    let output = normalize(
        &input,
        config.timestamp_policy,
        clock,
        config.precision,
        config.line_protocol,
    )?;
    println!("{output}");
    Ok(())
}

/// Assemble `input` and render it, as pretty JSON or, with `line_protocol`,
/// as a single line of line protocol.
fn normalize(
    input: &[u8],
    policy: TimestampPolicy,
    clock: Arc<dyn TimeProvider>,
    precision: Precision,
    line_protocol: bool,
) -> Result<String> {
    let raw = RawPayload::try_from(serde_json::from_slice::<serde_json::Value>(input)?)?;
    let record = PayloadAssembler::new(policy, clock).assemble_with_precision(&raw, precision)?;

    if line_protocol {
        Ok(DataPoint::new(&record, precision)?.to_string())
    } else {
        Ok(serde_json::to_string_pretty(&record)?)
    }
}
