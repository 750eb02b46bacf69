//! Core types for the ChronoNeura ingest server.
//!
//! Everything in this crate is pure: turning an inbound JSON payload into a
//! record that can be handed to the time-series store, and deciding which
//! bucket that record lands in. Nothing here performs I/O.
//!
//! ```text
//!   raw JSON ──▶ RawPayload ──▶ PayloadAssembler ──▶ NormalizedRecord
//!                    │              (normalize_key,
//!                    │               normalize_field_value,
//!                    │               normalize_tag_value)
//!                    └── mode / bucket ──▶ BucketSelector ──▶ bucket name
//! ```

pub mod bucket;
pub mod normalize;
pub mod payload;
pub mod time;

pub use bucket::{BucketConfigError, BucketSelector, Mode};
pub use normalize::{
    DEFAULT_KEY, FieldValue, normalize_field_value, normalize_key, normalize_optional_key,
    normalize_tag_value,
};
pub use payload::{
    NormalizedRecord, PayloadAssembler, RawPayload, TimestampPolicy, ValidationError,
};
pub use time::{MockProvider, Precision, SystemProvider, TimeProvider};
