//! # Sectorwire Digest
//!
//! Generic message-digest and HMAC dispatch for stream integrity
//! verification.
//!
//! Every supported hash algorithm is described by a [`DigestDescriptor`]
//! held in a process-wide immutable registry. Callers pick a descriptor by
//! kind or by name and drive it through [`DigestSession`] / [`HmacSession`]
//! without ever branching on the concrete algorithm; the transfer pipeline
//! treats SHA-224 and SHA-512 identically.
//!
//! ## Example
//!
//! ```
//! use sectorwire_digest::{registry, DigestKind, DigestSession};
//!
//! let descriptor = registry::lookup_by_kind(DigestKind::Sha256).unwrap();
//! let mut session = DigestSession::new(descriptor);
//! session.start()?;
//! session.update(b"sector data")?;
//! let output = session.finish()?;
//! assert_eq!(output.len(), descriptor.size());
//! # Ok::<(), sectorwire_digest::DigestError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use thiserror::Error;

pub mod engine;
pub mod registry;

pub use engine::{digest, hmac, DigestSession, HmacSession};
pub use registry::{DigestDescriptor, DigestKind};

/// Output size of the largest supported algorithm (SHA-512), in bytes.
///
/// Callers sizing a reusable output buffer may rely on this bound and on
/// nothing smaller; the actual length of any given digest is
/// [`DigestDescriptor::size`].
pub const MAX_DIGEST_SIZE: usize = 64;

/// Errors reported by the digest engine
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    /// Malformed arguments or a session driven outside its state machine
    #[error("bad input: {0}")]
    BadInput(&'static str),

    /// Allocation of algorithm working state failed
    #[error("failed to allocate digest state")]
    AllocFailed,
}

/// Result type alias using the digest error type
pub type Result<T> = std::result::Result<T, DigestError>;

/// Render a digest as a lowercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        assert_eq!(bytes_to_hex(&[]), "");
        assert_eq!(bytes_to_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
        assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }

    #[test]
    fn test_error_display() {
        let err = DigestError::BadInput("session not started");
        assert!(err.to_string().contains("session not started"));

        let err = DigestError::AllocFailed;
        assert!(err.to_string().contains("allocate"));
    }
}
