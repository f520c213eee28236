//! Error types for the sectorwire core

use thiserror::Error;

/// Main error type for transfer operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed arguments or a contract violation by the caller
    #[error("bad input: {0}")]
    BadInput(&'static str),

    /// Partition geometry or addressing failure
    #[error(transparent)]
    Topology(#[from] sectorwire_topology::TopologyError),

    /// Digest engine failure
    #[error(transparent)]
    Digest(#[from] sectorwire_digest::DigestError),

    /// Disk device failure after retries were exhausted
    #[error("device error: {0}")]
    Device(#[from] sectorwire_platform::PlatformError),

    /// Socket engine failure
    #[error(transparent)]
    Net(#[from] sectorwire_net::NetError),

    /// Computed digest differs from the transmitted trailer
    #[error("integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Digest carried by the trailer, lowercase hex
        expected: String,
        /// Locally computed digest, lowercase hex
        actual: String,
    },

    /// Peer closed the connection before the transfer finished
    #[error("peer closed early: received {received} of {expected} bytes")]
    PeerClosed {
        /// Bytes received before the close
        received: u64,
        /// Bytes the transfer required
        expected: u64,
    },

    /// A socket operation completed with an error status
    #[error("socket completion failed with OS error {0}")]
    SocketError(i32),

    /// The transfer was canceled
    #[error("transfer canceled")]
    Canceled,
}

/// Result type alias using the core error type
pub type Result<T> = std::result::Result<T, Error>;
