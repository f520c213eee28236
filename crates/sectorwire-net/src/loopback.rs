//! In-process loopback driver.
//!
//! Models the kernel interface's observable contract without touching the
//! network: connected socket pairs with byte streams, datagram pairs with
//! message boundaries and peer addresses, level-triggered poll readiness,
//! graceful close versus abort, and asynchronous cancellation. Used by the
//! test suites on every platform and as the engine's default on hosts
//! without the kernel driver.

use crate::driver::{RawCompletion, SocketDriver};
use crate::event::{CompletionStatus, OpKind, PollEvent, PollEvents, Token};
use crate::{NetError, OverlappedBuffer, Result, SocketId};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Connection reset error code surfaced by aborted sockets
pub const ECONNRESET: i32 = 10054;
/// Not-connected error code surfaced by sends on closed sockets
pub const ENOTCONN: i32 = 10057;

struct PendingRecv {
    token: Token,
    buffer: OverlappedBuffer,
    datagram: bool,
}

struct PendingPoll {
    token: Token,
    events: PollEvents,
}

struct SocketState {
    addr: SocketAddr,
    peer: Option<SocketId>,
    datagram: bool,
    inbox: VecDeque<u8>,
    dgram_inbox: VecDeque<(Vec<u8>, SocketAddr)>,
    remote_closed: bool,
    aborted: bool,
    local_closed: bool,
    pending_poll: Option<PendingPoll>,
    pending_recvs: VecDeque<PendingRecv>,
}

impl SocketState {
    fn new(addr: SocketAddr, datagram: bool) -> Self {
        Self {
            addr,
            peer: None,
            datagram,
            inbox: VecDeque::new(),
            dgram_inbox: VecDeque::new(),
            remote_closed: false,
            aborted: false,
            local_closed: false,
            pending_poll: None,
            pending_recvs: VecDeque::new(),
        }
    }

    /// Level-triggered readiness of this socket
    fn readiness(&self) -> PollEvents {
        let mut events = PollEvents::empty();
        if !self.inbox.is_empty() || !self.dgram_inbox.is_empty() {
            events.insert(PollEvent::Receive);
        }
        if self.peer.is_some() && !self.remote_closed && !self.aborted && !self.local_closed {
            events.insert(PollEvent::Send);
        }
        if self.remote_closed {
            events.insert(PollEvent::Disconnect);
        }
        if self.aborted {
            events.insert(PollEvent::Abort);
        }
        if self.local_closed {
            events.insert(PollEvent::LocalClose);
        }
        events
    }
}

#[derive(Default)]
struct State {
    sockets: HashMap<u64, SocketState>,
    completions: VecDeque<RawCompletion>,
    next_id: u64,
}

impl State {
    fn socket(&mut self, id: SocketId) -> Result<&mut SocketState> {
        self.sockets.get_mut(&id.0).ok_or(NetError::UnknownSocket(id))
    }

    /// Complete pending receives and polls that the socket's current state
    /// can satisfy
    fn deliver_pending(&mut self, id: SocketId) {
        let mut ready = Vec::new();

        if let Some(state) = self.sockets.get_mut(&id.0) {
            // Receives drain FIFO while data (or a close/abort verdict)
            // exists.
            while let Some(front) = state.pending_recvs.front() {
                let deliverable = if state.aborted {
                    true
                } else if front.datagram {
                    !state.dgram_inbox.is_empty()
                } else {
                    !state.inbox.is_empty() || state.remote_closed
                };
                if !deliverable {
                    break;
                }
                if let Some(pending) = state.pending_recvs.pop_front() {
                    ready.push(complete_recv(state, pending));
                }
            }

            let observed = state
                .pending_poll
                .as_ref()
                .map(|poll| state.readiness().intersection(poll.events))
                .unwrap_or_default();
            if !observed.is_empty() {
                if let Some(poll) = state.pending_poll.take() {
                    ready.push(RawCompletion {
                        token: poll.token,
                        op: OpKind::Poll,
                        status: CompletionStatus::Success,
                        bytes: 0,
                        events: observed.raw(),
                        peer: None,
                        buffer: None,
                    });
                }
            }
        }

        self.completions.extend(ready);
    }
}

/// Fill a receive completion from the socket's current state
fn complete_recv(state: &mut SocketState, mut pending: PendingRecv) -> RawCompletion {
    if state.aborted {
        return RawCompletion {
            token: pending.token,
            op: if pending.datagram {
                OpKind::ReceiveDatagram
            } else {
                OpKind::Receive
            },
            status: CompletionStatus::Error(ECONNRESET),
            bytes: 0,
            events: 0,
            peer: None,
            buffer: Some(pending.buffer),
        };
    }

    if pending.datagram {
        let (data, from) = state
            .dgram_inbox
            .pop_front()
            .unwrap_or_else(|| (Vec::new(), state.addr));
        let bytes = pending.buffer.fill_from(&data);
        RawCompletion {
            token: pending.token,
            op: OpKind::ReceiveDatagram,
            status: CompletionStatus::Success,
            bytes,
            events: 0,
            peer: Some(from),
            buffer: Some(pending.buffer),
        }
    } else {
        // Partial completion is normal: take whatever the stream holds,
        // clipped to buffer capacity. Zero bytes on an empty, closed
        // stream is the graceful-close signal.
        let capacity = pending.buffer.total_len();
        let take = capacity.min(state.inbox.len());
        let data: Vec<u8> = state.inbox.drain(..take).collect();
        let bytes = pending.buffer.fill_from(&data);
        RawCompletion {
            token: pending.token,
            op: OpKind::Receive,
            status: CompletionStatus::Success,
            bytes,
            events: 0,
            peer: None,
            buffer: Some(pending.buffer),
        }
    }
}

struct Inner {
    state: Mutex<State>,
    available: Condvar,
}

/// In-process socket driver with deterministic loopback semantics.
///
/// Cheap to clone; all clones share one network.
#[derive(Clone)]
pub struct LoopbackDriver {
    inner: Arc<Inner>,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    /// Create an empty loopback network
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                available: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn alloc_socket(state: &mut State, datagram: bool) -> SocketId {
        state.next_id += 1;
        let id = state.next_id;
        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            40000 + (id % 20000) as u16,
        );
        state.sockets.insert(id, SocketState::new(addr, datagram));
        SocketId(id)
    }

    fn alloc_pair(&self, datagram: bool) -> (SocketId, SocketId) {
        let mut state = self.lock();
        let a = Self::alloc_socket(&mut state, datagram);
        let b = Self::alloc_socket(&mut state, datagram);
        if let Some(s) = state.sockets.get_mut(&a.0) {
            s.peer = Some(b);
        }
        if let Some(s) = state.sockets.get_mut(&b.0) {
            s.peer = Some(a);
        }
        (a, b)
    }

    /// Create a connected stream socket pair
    pub fn socket_pair(&self) -> (SocketId, SocketId) {
        self.alloc_pair(false)
    }

    /// Create a connected datagram socket pair
    pub fn datagram_pair(&self) -> (SocketId, SocketId) {
        self.alloc_pair(true)
    }

    /// Address assigned to a socket
    pub fn addr_of(&self, socket: SocketId) -> Option<SocketAddr> {
        self.lock().sockets.get(&socket.0).map(|s| s.addr)
    }

    /// Gracefully close a socket's send side; the peer observes a
    /// zero-byte receive / Disconnect readiness
    pub fn close(&self, socket: SocketId) -> Result<()> {
        let mut state = self.lock();
        let peer = {
            let s = state.socket(socket)?;
            s.local_closed = true;
            s.peer
        };
        state.deliver_pending(socket);
        if let Some(peer) = peer {
            if let Ok(p) = state.socket(peer) {
                p.remote_closed = true;
            }
            state.deliver_pending(peer);
        }
        self.inner.available.notify_all();
        Ok(())
    }

    /// Abort a connection; both ends observe a reset
    pub fn abort(&self, socket: SocketId) -> Result<()> {
        let mut state = self.lock();
        let peer = {
            let s = state.socket(socket)?;
            s.aborted = true;
            s.peer
        };
        state.deliver_pending(socket);
        if let Some(peer) = peer {
            if let Ok(p) = state.socket(peer) {
                p.aborted = true;
            }
            state.deliver_pending(peer);
        }
        self.inner.available.notify_all();
        Ok(())
    }
}

impl SocketDriver for LoopbackDriver {
    fn submit_poll(&self, socket: SocketId, events: PollEvents, token: Token) -> Result<()> {
        let mut state = self.lock();
        let s = state.socket(socket)?;
        if s.pending_poll.is_some() {
            return Err(NetError::AlreadyPending(socket));
        }
        s.pending_poll = Some(PendingPoll { token, events });
        state.deliver_pending(socket);
        self.inner.available.notify_all();
        Ok(())
    }

    fn submit_receive(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()> {
        let mut state = self.lock();
        let s = state.socket(socket)?;
        s.pending_recvs.push_back(PendingRecv {
            token,
            buffer,
            datagram: false,
        });
        state.deliver_pending(socket);
        self.inner.available.notify_all();
        Ok(())
    }

    fn submit_receive_datagram(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()> {
        let mut state = self.lock();
        let s = state.socket(socket)?;
        s.pending_recvs.push_back(PendingRecv {
            token,
            buffer,
            datagram: true,
        });
        state.deliver_pending(socket);
        self.inner.available.notify_all();
        Ok(())
    }

    fn submit_send(&self, socket: SocketId, buffer: OverlappedBuffer, token: Token) -> Result<()> {
        let mut state = self.lock();
        let (peer, addr, aborted, closed, datagram) = {
            let s = state.socket(socket)?;
            (
                s.peer,
                s.addr,
                s.aborted,
                s.local_closed || s.remote_closed,
                s.datagram,
            )
        };

        let bytes = buffer.total_len();
        let completion = match peer {
            Some(peer_id) if !aborted && !closed => {
                let data = buffer.contiguous(bytes);
                match state.socket(peer_id) {
                    Ok(p) => {
                        if datagram {
                            p.dgram_inbox.push_back((data, addr));
                        } else {
                            p.inbox.extend(data);
                        }
                        state.deliver_pending(peer_id);
                        RawCompletion {
                            token,
                            op: OpKind::Send,
                            status: CompletionStatus::Success,
                            bytes,
                            events: 0,
                            peer: None,
                            buffer: Some(buffer),
                        }
                    }
                    Err(_) => RawCompletion {
                        token,
                        op: OpKind::Send,
                        status: CompletionStatus::Error(ENOTCONN),
                        bytes: 0,
                        events: 0,
                        peer: None,
                        buffer: Some(buffer),
                    },
                }
            }
            _ => RawCompletion {
                token,
                op: OpKind::Send,
                status: CompletionStatus::Error(if aborted { ECONNRESET } else { ENOTCONN }),
                bytes: 0,
                events: 0,
                peer: None,
                buffer: Some(buffer),
            },
        };

        state.completions.push_back(completion);
        self.inner.available.notify_all();
        Ok(())
    }

    fn cancel(&self, socket: SocketId) -> Result<()> {
        let mut state = self.lock();
        let s = state.socket(socket)?;

        let mut canceled = Vec::new();
        if let Some(poll) = s.pending_poll.take() {
            canceled.push(RawCompletion {
                token: poll.token,
                op: OpKind::Poll,
                status: CompletionStatus::Canceled,
                bytes: 0,
                events: 0,
                peer: None,
                buffer: None,
            });
        }
        while let Some(pending) = s.pending_recvs.pop_front() {
            canceled.push(RawCompletion {
                token: pending.token,
                op: if pending.datagram {
                    OpKind::ReceiveDatagram
                } else {
                    OpKind::Receive
                },
                status: CompletionStatus::Canceled,
                bytes: 0,
                events: 0,
                peer: None,
                buffer: Some(pending.buffer),
            });
        }

        tracing::trace!("canceled {} pending operations on {}", canceled.len(), socket);
        state.completions.extend(canceled);
        self.inner.available.notify_all();
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>, out: &mut Vec<RawCompletion>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();

        loop {
            if !state.completions.is_empty() {
                out.extend(state.completions.drain(..));
                return Ok(());
            }
            match deadline {
                None => {
                    state = self
                        .inner
                        .available
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    let (guard, _) = self
                        .inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }
}
