//! Bucket selection.
//!
//! A request names its target either directly (an explicit bucket) or through
//! a mode flag. Anything that is not recognisably `sandbox` resolves to the
//! production bucket: a typo in a client's mode string writes to production
//! rather than failing the request.

use std::fmt;
use thiserror::Error;
use tracing::warn;

/// The two storage partitions a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Sandbox,
    Prod,
}

impl Mode {
    /// Resolve a client-supplied mode string.
    ///
    /// Comparison is case-insensitive and ignores surrounding whitespace.
    /// `None`, empty strings and unrecognised values all resolve to
    /// [`Mode::Prod`].
    pub fn resolve(mode: Option<&str>) -> Self {
        match mode.map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("sandbox") => Self::Sandbox,
            Some(m) if m.is_empty() || m.eq_ignore_ascii_case("prod") => Self::Prod,
            Some(m) => {
                warn!(mode = %m, "unrecognised mode, falling back to prod");
                Self::Prod
            }
            None => Self::Prod,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Misconfiguration detected while building a [`BucketSelector`].
#[derive(Debug, Clone, Copy, Error)]
pub enum BucketConfigError {
    #[error("the {0} bucket name must not be empty")]
    EmptyBucket(Mode),
}

/// Maps a mode (or an explicit override) onto a configured bucket name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSelector {
    prod: String,
    sandbox: String,
}

impl BucketSelector {
    /// Create a selector over the two configured buckets. Both names must be
    /// non-empty.
    pub fn new(
        prod: impl Into<String>,
        sandbox: impl Into<String>,
    ) -> Result<Self, BucketConfigError> {
        let prod = prod.into().trim().to_string();
        let sandbox = sandbox.into().trim().to_string();

        if prod.is_empty() {
            return Err(BucketConfigError::EmptyBucket(Mode::Prod));
        }
        if sandbox.is_empty() {
            return Err(BucketConfigError::EmptyBucket(Mode::Sandbox));
        }

        Ok(Self { prod, sandbox })
    }

    /// The bucket configured for `mode`.
    pub fn bucket(&self, mode: Mode) -> &str {
        match mode {
            Mode::Sandbox => &self.sandbox,
            Mode::Prod => &self.prod,
        }
    }

    /// Choose the target bucket.
    ///
    /// A non-empty `explicit_override` wins outright. Otherwise the mode is
    /// resolved with [`Mode::resolve`].
    pub fn select<'a>(&'a self, mode: Option<&str>, explicit_override: Option<&'a str>) -> &'a str {
        match explicit_override.map(str::trim).filter(|b| !b.is_empty()) {
            Some(bucket) => bucket,
            None => self.bucket(Mode::resolve(mode)),
        }
    }
}
