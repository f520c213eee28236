//! # Sectorwire Net
//!
//! Completion-driven socket I/O engine.
//!
//! Instead of the blocking socket API, I/O requests are submitted
//! asynchronously and their results consumed from a single completion
//! channel per engine. On Windows the requests go directly to the
//! network stack's kernel driver (AFD), which both avoids a known
//! peer-address corruption defect in the standard receive-from path and
//! removes one layer of indirection; everywhere else, and in every test,
//! the same engine runs over an in-process [`LoopbackDriver`].
//!
//! The load-bearing invariant is buffer ownership: memory submitted with
//! an operation belongs to the engine until the matching [`Completion`]
//! is observed, at which point the completion hands it back. Cancellation
//! is asynchronous and always surfaces a completion marked
//! [`CompletionStatus::Canceled`]; reclaiming a buffer before seeing that
//! completion is unsound by contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

use thiserror::Error;

pub mod afd;
pub mod buffer;
pub mod driver;
pub mod engine;
pub mod event;
pub mod loopback;

pub use buffer::OverlappedBuffer;
pub use driver::{RawCompletion, SocketDriver};
pub use engine::{AsyncSocketEngine, MAX_IN_FLIGHT};
pub use event::{Completion, CompletionStatus, OpKind, PollEvent, PollEvents, Token};
pub use loopback::LoopbackDriver;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::AfdDriver;

/// Engine-assigned identity of a registered socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Socket engine errors
#[derive(Error, Debug)]
pub enum NetError {
    /// A poll registration already exists for this socket
    #[error("{0} already has a pending poll registration")]
    AlreadyPending(SocketId),

    /// In-flight operation table is full
    #[error("failed to allocate an in-flight operation slot")]
    AllocFailed,

    /// Malformed arguments
    #[error("bad input: {0}")]
    BadInput(&'static str),

    /// Socket is not known to the driver
    #[error("{0} is not registered")]
    UnknownSocket(SocketId),

    /// Underlying OS or driver failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the socket engine error type
pub type Result<T> = std::result::Result<T, NetError>;
