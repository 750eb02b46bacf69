//! Building blocks for [`clap`]-driven configs.
//!
//! They can easily be re-used using `#[clap(flatten)]`.
pub mod influx;
pub mod logging;
pub mod notion;
pub mod socket_addr;
