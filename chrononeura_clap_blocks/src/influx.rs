//! Connection settings for the InfluxDB time-series store.

use chrononeura_influx::Client;
use chrononeura_types::{BucketConfigError, BucketSelector};
use secrecy::{ExposeSecret, Secret};
use url::Url;

pub(crate) fn parse_secret(s: &str) -> Result<Secret<String>, std::convert::Infallible> {
    Ok(Secret::new(s.to_string()))
}

/// CLI config for the InfluxDB v2 API the ingest service writes to.
#[derive(Debug, Clone, clap::Parser)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server, e.g. `http://localhost:8086`.
    #[clap(long = "influx-url", env = "INFLUX_URL", action)]
    pub url: Url,

    /// API token, sent as `Authorization: Token <token>`.
    #[clap(
        id = "influx_token",
        long = "influx-token",
        env = "INFLUX_TOKEN",
        hide_env_values = true,
        value_parser = parse_secret,
        action
    )]
    pub token: Secret<String>,

    /// Organization that owns the buckets.
    #[clap(long = "influx-org", env = "INFLUX_ORG", action)]
    pub org: String,

    /// Bucket for `prod` writes, and for any request whose mode is missing or
    /// not recognised.
    #[clap(long = "influx-bucket", env = "INFLUX_BUCKET", action)]
    pub bucket: String,

    /// Bucket for `sandbox` writes.
    #[clap(long = "influx-bucket-sandbox", env = "INFLUX_BUCKET_SANDBOX", action)]
    pub bucket_sandbox: String,

    /// Timeout for each request to InfluxDB.
    #[clap(
        id = "influx_timeout",
        long = "influx-timeout",
        env = "INFLUX_TIMEOUT",
        default_value = "10s",
        action
    )]
    pub timeout: humantime::Duration,
}

impl InfluxConfig {
    pub fn client(&self) -> Result<Client, chrononeura_influx::Error> {
        Client::new(self.url.clone(), &self.org)?
            .with_auth_token(self.token.expose_secret())
            .with_timeout(*self.timeout)
    }

    pub fn bucket_selector(&self) -> Result<BucketSelector, BucketConfigError> {
        BucketSelector::new(&self.bucket, &self.bucket_sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::Parser;
    use std::time::Duration;

    const REQUIRED: &[&str] = &[
        "chrononeura",
        "--influx-url",
        "http://localhost:8086",
        "--influx-token",
        "t0ken",
        "--influx-org",
        "chrononeura",
        "--influx-bucket",
        "chrono_trace",
        "--influx-bucket-sandbox",
        "chrono_test",
    ];

    #[test]
    fn parses_and_builds() {
        let config = InfluxConfig::try_parse_from(REQUIRED).unwrap();
        assert_eq!(config.url.as_str(), "http://localhost:8086/");
        assert_eq!(config.token.expose_secret(), "t0ken");
        assert_eq!(*config.timeout, Duration::from_secs(10));

        let selector = config.bucket_selector().unwrap();
        assert_eq!(selector.select(Some("sandbox"), None), "chrono_test");
        assert_eq!(selector.select(None, None), "chrono_trace");

        config.client().unwrap();
    }

    #[test]
    fn token_is_redacted() {
        let config = InfluxConfig::try_parse_from(REQUIRED).unwrap();
        assert!(!format!("{config:?}").contains("t0ken"));
    }

    #[test]
    fn empty_bucket_is_a_startup_error() {
        let mut args = REQUIRED.to_vec();
        let last = args.len() - 1;
        args[last] = " ";
        let config = InfluxConfig::try_parse_from(args).unwrap();
        assert_matches!(config.bucket_selector(), Err(BucketConfigError::EmptyBucket(_)));
    }
}
