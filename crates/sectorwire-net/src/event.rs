//! Poll events, completion records, and their raw encodings.
//!
//! The kernel interface speaks an 11-bit event mask; everything above the
//! driver boundary uses the typed [`PollEvents`] set and converts at the
//! edge with [`PollEvents::raw`] / [`PollEvents::from_raw`].

use crate::{OverlappedBuffer, SocketId};
use std::net::SocketAddr;

/// Token correlating a submission with its eventual completion
pub type Token = u64;

/// One of the eleven independent poll conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PollEvent {
    /// Data available for receive
    Receive = 0,
    /// Expedited (out-of-band) data available
    ReceiveExpedited = 1,
    /// Send buffer space available
    Send = 2,
    /// Peer closed its send side
    Disconnect = 3,
    /// Connection aborted
    Abort = 4,
    /// Socket closed locally
    LocalClose = 5,
    /// Outbound connect finished
    Connect = 6,
    /// Inbound connection waiting for accept
    Accept = 7,
    /// Outbound connect failed
    ConnectFail = 8,
    /// Quality-of-service change
    Qos = 9,
    /// Group quality-of-service change
    GroupQos = 10,
}

impl PollEvent {
    /// Number of distinct poll conditions
    pub const COUNT: usize = 11;

    /// All conditions in bit order
    pub const ALL: [PollEvent; PollEvent::COUNT] = [
        PollEvent::Receive,
        PollEvent::ReceiveExpedited,
        PollEvent::Send,
        PollEvent::Disconnect,
        PollEvent::Abort,
        PollEvent::LocalClose,
        PollEvent::Connect,
        PollEvent::Accept,
        PollEvent::ConnectFail,
        PollEvent::Qos,
        PollEvent::GroupQos,
    ];

    /// The single-bit raw encoding of this condition
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Typed set of poll conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PollEvents(u32);

impl PollEvents {
    /// Raw mask covering every defined condition
    pub const RAW_MASK: u32 = (1 << PollEvent::COUNT as u32) - 1;

    /// The empty set
    pub fn empty() -> Self {
        Self(0)
    }

    /// The set of all conditions
    pub fn all() -> Self {
        Self(Self::RAW_MASK)
    }

    /// Decode a raw mask, discarding undefined bits
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & Self::RAW_MASK)
    }

    /// Raw mask encoding of the set
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether no condition is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether `event` is in the set
    pub fn contains(self, event: PollEvent) -> bool {
        self.0 & event.bit() != 0
    }

    /// Add a condition
    pub fn insert(&mut self, event: PollEvent) {
        self.0 |= event.bit();
    }

    /// Remove a condition
    pub fn remove(&mut self, event: PollEvent) {
        self.0 &= !event.bit();
    }

    /// Set intersection
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Iterate over the conditions in the set, in bit order
    pub fn iter(self) -> impl Iterator<Item = PollEvent> {
        PollEvent::ALL
            .into_iter()
            .filter(move |event| self.contains(*event))
    }
}

impl From<PollEvent> for PollEvents {
    fn from(event: PollEvent) -> Self {
        Self(event.bit())
    }
}

impl std::ops::BitOr for PollEvents {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<PollEvent> for PollEvents {
    type Output = Self;
    fn bitor(self, rhs: PollEvent) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl std::ops::BitOr for PollEvent {
    type Output = PollEvents;
    fn bitor(self, rhs: Self) -> PollEvents {
        PollEvents(self.bit() | rhs.bit())
    }
}

/// Kind of submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Poll registration
    Poll,
    /// Stream receive
    Receive,
    /// Datagram receive with peer address capture
    ReceiveDatagram,
    /// Send
    Send,
}

/// Outcome of a completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Operation finished normally
    Success,
    /// Operation was canceled before finishing
    Canceled,
    /// Operation failed with an OS error code
    Error(i32),
}

impl CompletionStatus {
    /// Whether the operation finished normally
    pub fn is_success(self) -> bool {
        matches!(self, CompletionStatus::Success)
    }

    /// Whether the operation was canceled
    pub fn is_canceled(self) -> bool {
        matches!(self, CompletionStatus::Canceled)
    }
}

/// One delivered completion.
///
/// For receives and sends, `buffer` carries the submitted memory back to
/// the caller; this hand-back is the only way buffer ownership returns.
/// A successful stream receive of zero bytes is a graceful peer close,
/// not an error.
#[derive(Debug)]
pub struct Completion {
    /// Socket the operation was submitted on
    pub socket: SocketId,
    /// Submission token
    pub token: Token,
    /// Kind of the completed operation
    pub op: OpKind,
    /// Success, cancellation, or error
    pub status: CompletionStatus,
    /// Exact bytes transferred (receive/send)
    pub bytes: usize,
    /// Conditions observed (poll)
    pub events: PollEvents,
    /// Peer address (datagram receive)
    pub peer: Option<SocketAddr>,
    /// The submitted buffer, returned to caller ownership
    pub buffer: Option<OverlappedBuffer>,
}
