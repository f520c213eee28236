//! The driver seam between the engine and a platform's socket interface.
//!
//! A [`SocketDriver`] accepts submissions addressed by [`SocketId`] and
//! reports raw completions through [`SocketDriver::wait`]. The engine owns
//! every invariant above this line (slot accounting, one-poll-per-socket,
//! ownership hand-back); a driver only moves bytes and delivers
//! completions for a given socket in submission order.

use crate::event::{CompletionStatus, OpKind, Token};
use crate::{OverlappedBuffer, Result, SocketId};
use std::net::SocketAddr;
use std::time::Duration;

/// A completion as produced by a driver, before the engine resolves its
/// slot bookkeeping
#[derive(Debug)]
pub struct RawCompletion {
    /// Submission token
    pub token: Token,
    /// Kind of the completed operation
    pub op: OpKind,
    /// Outcome
    pub status: CompletionStatus,
    /// Exact bytes transferred
    pub bytes: usize,
    /// Raw observed event mask (poll completions)
    pub events: u32,
    /// Peer address (datagram receives)
    pub peer: Option<SocketAddr>,
    /// Submitted memory moving back toward the caller
    pub buffer: Option<OverlappedBuffer>,
}

/// Platform interface issuing overlapped socket requests.
///
/// Exactly three operation kinds reach the kernel interface: receive,
/// receive-datagram, and poll. Sends are driven from send-readiness and
/// pushed through the socket itself.
pub trait SocketDriver: Send {
    /// Submit an overlapped poll for the given event mask
    fn submit_poll(&self, socket: SocketId, events: crate::PollEvents, token: Token) -> Result<()>;

    /// Submit an overlapped stream receive into `buffer`
    fn submit_receive(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()>;

    /// Submit an overlapped datagram receive into `buffer`, capturing the
    /// peer address
    fn submit_receive_datagram(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()>;

    /// Push `buffer` to the peer, completing with the bytes sent
    fn submit_send(&self, socket: SocketId, buffer: OverlappedBuffer, token: Token) -> Result<()>;

    /// Request cancellation of every outstanding operation on `socket`.
    ///
    /// Asynchronous: each affected operation still completes, marked
    /// [`CompletionStatus::Canceled`], carrying its buffer back.
    fn cancel(&self, socket: SocketId) -> Result<()>;

    /// Block up to `timeout` for completions and append them to `out`.
    ///
    /// `None` blocks indefinitely; `Some(Duration::ZERO)` drains without
    /// blocking. Completions for one socket appear in submission order.
    fn wait(&self, timeout: Option<Duration>, out: &mut Vec<RawCompletion>) -> Result<()>;
}
