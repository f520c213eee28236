//! # Sectorwire Core
//!
//! The transfer pipeline tying the pieces together: sector buffers flow
//! from a [`SectorStream`] through a digest session and out through the
//! completion-driven socket engine, with backpressure from a bounded
//! in-flight buffer budget. The receive side runs the same pipeline in
//! reverse and ends with a digest comparison against the transmitted
//! trailer; a mismatch is always surfaced, never reported as success.
//!
//! ## Modules
//!
//! - `config`: runtime transfer configuration
//! - `stream`: sector-aligned reader/writer over one logical partition
//! - `pipeline`: send/receive transfer driving with integrity trailer
//! - `error`: error types and result alias

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod stream;

pub use config::TransferConfig;
pub use error::{Error, Result};
pub use pipeline::{decode_trailer, encode_trailer, TransferPipeline, TransferReport};
pub use stream::SectorStream;
