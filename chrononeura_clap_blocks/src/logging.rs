//! CLI flags for logging, and installing the global `tracing` subscriber
//! they describe.

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::writer::BoxMakeWriter,
    layer::SubscriberExt,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("cannot set global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Full,
    Pretty,
    Json,
    Logfmt,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "logfmt" => Ok(Self::Logfmt),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: full, pretty, json, logfmt"
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
            Self::Logfmt => write!(f, "logfmt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    Stderr,
}

impl std::str::FromStr for LogDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(format!(
                "Invalid log destination '{s}'. Valid options: stdout, stderr"
            )),
        }
    }
}

impl std::fmt::Display for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,hyper::proto::h1=info` specifies debug logging for all modules
    /// except for the `hyper::proto::h1` module which will only display info
    /// level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,hyper::proto::h1=info,h2=info'
    ///
    /// -vvv 'trace,hyper::proto::h1=info,h2=info'
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        verbatim_doc_comment
    )]
    pub log_verbose_count: u8,

    /// Logs: destination
    ///
    /// Can be one of: stdout, stderr
    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value = "stdout",
        verbatim_doc_comment,
        action
    )]
    pub log_destination: LogDestination,

    /// Logs: message format
    ///
    /// Can be one of:
    ///
    /// full: human-readable, single line
    ///
    /// pretty: human-readable, multi line
    ///
    /// json: machine-parseable
    ///
    /// logfmt: compact single line without colours, for log shippers
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value = "full",
        verbatim_doc_comment,
        action
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    /// Used when neither `--log-filter` nor `-v` is given.
    pub const DEFAULT_LOG_FILTER: &'static str = "info";

    /// The filter selected by the flags. `-v` wins over `--log-filter`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let directive = match self.log_verbose_count {
            0 => self
                .log_filter
                .as_deref()
                .unwrap_or(Self::DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug,hyper::proto::h1=info,h2=info",
            _ => "trace,hyper::proto::h1=info,h2=info",
        };
        Ok(EnvFilter::try_new(directive)?)
    }

    /// Install the configured subscriber as the process-wide default.
    pub fn install_global_subscriber(&self) -> Result<()> {
        let filter = self.env_filter()?;

        let writer = match self.log_destination {
            LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        };

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.log_format {
            LogFormat::Full => fmt_layer.boxed(),
            LogFormat::Pretty => fmt_layer.pretty().boxed(),
            LogFormat::Json => fmt_layer.json().boxed(),
            LogFormat::Logfmt => fmt_layer.compact().with_ansi(false).boxed(),
        };

        let subscriber = Registry::default().with(layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::Parser;

    fn parse(args: &[&str]) -> LoggingConfig {
        LoggingConfig::try_parse_from(std::iter::once("chrononeura").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.log_destination, LogDestination::Stdout);
        assert_eq!(config.log_format, LogFormat::Full);
        assert_eq!(config.env_filter().unwrap().to_string(), "info");
    }

    #[test]
    fn verbose_overrides_the_filter() {
        let config = parse(&["--log-filter", "warn", "-vvv"]);
        assert_eq!(config.log_verbose_count, 3);
        assert!(config.env_filter().unwrap().to_string().contains("trace"));

        let config = parse(&["--log-filter", "warn"]);
        assert_eq!(config.env_filter().unwrap().to_string(), "warn");
    }

    #[test]
    fn bad_values() {
        assert!(LoggingConfig::try_parse_from(["chrononeura", "--log-format", "xml"]).is_err());
        assert!(
            LoggingConfig::try_parse_from(["chrononeura", "--log-destination", "file"]).is_err()
        );
        assert_matches!(
            parse(&["--log-filter", "chrononeura=loud"]).env_filter(),
            Err(Error::InvalidLogFilter(_))
        );
    }

    #[test]
    fn format_round_trip() {
        for f in ["full", "pretty", "json", "logfmt"] {
            assert_eq!(f.parse::<LogFormat>().unwrap().to_string(), f);
        }
    }
}
