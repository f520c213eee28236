//! The completion-driven socket engine.
//!
//! The engine enforces every contract the driver does not: at most one
//! outstanding poll registration per socket, slot-table accounting for
//! in-flight operations, and the ownership hand-back of submitted buffers
//! through [`Completion`] records. One engine instance owns one completion
//! channel; a worker thread drives it with [`AsyncSocketEngine::poll_completions`].

use crate::driver::SocketDriver;
use crate::event::{Completion, OpKind, PollEvents, Token};
use crate::{NetError, OverlappedBuffer, Result, SocketId};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound on concurrently in-flight operations per engine
pub const MAX_IN_FLIGHT: usize = 1024;

struct InFlight {
    socket: SocketId,
    op: OpKind,
}

/// Arena of in-flight operation slots, indexed by completion token.
///
/// A token packs the slot index with a generation counter so a stale
/// completion can never resolve to a reused slot.
struct SlotTable {
    slots: Vec<Option<InFlight>>,
    generations: Vec<u32>,
    free: Vec<usize>,
}

impl SlotTable {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, entry: InFlight) -> Result<Token> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() >= MAX_IN_FLIGHT {
                    return Err(NetError::AllocFailed);
                }
                self.slots.push(None);
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        self.slots[index] = Some(entry);
        Ok(pack_token(index, self.generations[index]))
    }

    fn remove(&mut self, token: Token) -> Option<InFlight> {
        let (index, generation) = unpack_token(token);
        if index >= self.slots.len() || self.generations[index] != generation {
            return None;
        }
        let entry = self.slots[index].take()?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(index);
        Some(entry)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

fn pack_token(index: usize, generation: u32) -> Token {
    (u64::from(generation) << 32) | index as u64
}

fn unpack_token(token: Token) -> (usize, u32) {
    ((token & 0xFFFF_FFFF) as usize, (token >> 32) as u32)
}

#[derive(Default)]
struct SocketEntry {
    poll_pending: bool,
    pending_ops: usize,
}

/// Completion-driven socket I/O multiplexer.
///
/// Per-socket completions are delivered in submission order; completions
/// across different sockets are unordered relative to each other.
pub struct AsyncSocketEngine {
    driver: Box<dyn SocketDriver>,
    slots: SlotTable,
    sockets: HashMap<SocketId, SocketEntry>,
}

impl AsyncSocketEngine {
    /// Create an engine over a driver
    pub fn new(driver: Box<dyn SocketDriver>) -> Self {
        Self {
            driver,
            slots: SlotTable::new(),
            sockets: HashMap::new(),
        }
    }

    /// Register one overlapped poll for `events` on `socket`.
    ///
    /// Hard invariant: at most one poll may be in flight per socket.
    /// A duplicate registration fails with [`NetError::AlreadyPending`]
    /// and leaves the original registration intact.
    pub fn register_poll(&mut self, socket: SocketId, events: PollEvents) -> Result<Token> {
        if events.is_empty() {
            return Err(NetError::BadInput("empty poll event mask"));
        }
        if self.sockets.entry(socket).or_default().poll_pending {
            return Err(NetError::AlreadyPending(socket));
        }

        let token = self.slots.insert(InFlight {
            socket,
            op: OpKind::Poll,
        })?;
        if let Err(e) = self.driver.submit_poll(socket, events, token) {
            self.slots.remove(token);
            return Err(e);
        }

        if let Some(entry) = self.sockets.get_mut(&socket) {
            entry.poll_pending = true;
        }
        tracing::trace!("{} poll registered for {:?}", socket, events);
        Ok(token)
    }

    /// Submit an overlapped stream receive.
    ///
    /// `buffer` ownership transfers to the engine until the matching
    /// completion is observed. Completes with the exact byte count
    /// delivered; zero bytes with success is a graceful peer close.
    pub fn submit_receive(&mut self, socket: SocketId, buffer: OverlappedBuffer) -> Result<Token> {
        self.submit_op(socket, buffer, OpKind::Receive)
    }

    /// Submit an overlapped datagram receive, capturing the peer address
    /// in the completion
    pub fn submit_receive_datagram(
        &mut self,
        socket: SocketId,
        buffer: OverlappedBuffer,
    ) -> Result<Token> {
        self.submit_op(socket, buffer, OpKind::ReceiveDatagram)
    }

    /// Submit a send; the completion reports the bytes pushed and returns
    /// the buffer
    pub fn submit_send(&mut self, socket: SocketId, buffer: OverlappedBuffer) -> Result<Token> {
        self.submit_op(socket, buffer, OpKind::Send)
    }

    fn submit_op(
        &mut self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        op: OpKind,
    ) -> Result<Token> {
        if buffer.total_len() == 0 {
            return Err(NetError::BadInput("empty buffer"));
        }

        let token = self.slots.insert(InFlight { socket, op })?;
        let submit = match op {
            OpKind::Receive => self.driver.submit_receive(socket, buffer, token),
            OpKind::ReceiveDatagram => self.driver.submit_receive_datagram(socket, buffer, token),
            OpKind::Send => self.driver.submit_send(socket, buffer, token),
            OpKind::Poll => unreachable!("polls go through register_poll"),
        };
        if let Err(e) = submit {
            self.slots.remove(token);
            return Err(e);
        }

        self.sockets.entry(socket).or_default().pending_ops += 1;
        Ok(token)
    }

    /// Request cancellation of everything outstanding on `socket`.
    ///
    /// Asynchronous: each affected operation still produces a completion,
    /// marked canceled, and buffers come back only through those
    /// completions. Callers must keep polling until every outstanding
    /// token has been observed.
    pub fn cancel(&mut self, socket: SocketId) -> Result<()> {
        self.driver.cancel(socket)
    }

    /// Wait up to `timeout` on the completion channel.
    ///
    /// `None` blocks indefinitely; `Some(Duration::ZERO)` drains whatever
    /// is already queued and returns immediately.
    pub fn poll_completions(&mut self, timeout: Option<Duration>) -> Result<Vec<Completion>> {
        let mut raw = Vec::new();
        self.driver.wait(timeout, &mut raw)?;

        let mut completions = Vec::with_capacity(raw.len());
        for completion in raw {
            let Some(entry) = self.slots.remove(completion.token) else {
                tracing::warn!("dropping completion with stale token {}", completion.token);
                continue;
            };

            if let Some(state) = self.sockets.get_mut(&entry.socket) {
                match entry.op {
                    OpKind::Poll => state.poll_pending = false,
                    _ => state.pending_ops = state.pending_ops.saturating_sub(1),
                }
            }

            completions.push(Completion {
                socket: entry.socket,
                token: completion.token,
                op: entry.op,
                status: completion.status,
                bytes: completion.bytes,
                events: PollEvents::from_raw(completion.events),
                peer: completion.peer,
                buffer: completion.buffer,
            });
        }
        Ok(completions)
    }

    /// Number of operations currently in flight across all sockets
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Whether `socket` has any outstanding poll or I/O operation
    pub fn has_pending(&self, socket: SocketId) -> bool {
        self.sockets
            .get(&socket)
            .map(|entry| entry.poll_pending || entry.pending_ops > 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CompletionStatus, PollEvent};
    use crate::loopback::LoopbackDriver;

    fn engine_with_pair() -> (AsyncSocketEngine, LoopbackDriver, SocketId, SocketId) {
        let driver = LoopbackDriver::new();
        let (a, b) = driver.socket_pair();
        let engine = AsyncSocketEngine::new(Box::new(driver.clone()));
        (engine, driver, a, b)
    }

    fn drain(engine: &mut AsyncSocketEngine) -> Vec<Completion> {
        engine.poll_completions(Some(Duration::ZERO)).unwrap()
    }

    #[test]
    fn test_duplicate_poll_rejected_original_intact() {
        let (mut engine, driver, a, b) = engine_with_pair();

        let token = engine.register_poll(b, PollEvent::Receive.into()).unwrap();
        let err = engine
            .register_poll(b, PollEvent::Receive.into())
            .unwrap_err();
        assert!(matches!(err, NetError::AlreadyPending(s) if s == b));

        // The original registration still fires when data arrives.
        engine
            .submit_send(a, OverlappedBuffer::from_vec(vec![1]))
            .unwrap();
        let completions = drain(&mut engine);
        let poll = completions.iter().find(|c| c.op == OpKind::Poll).unwrap();
        assert_eq!(poll.token, token);
        assert!(poll.events.contains(PollEvent::Receive));
        drop(driver);
    }

    #[test]
    fn test_poll_can_be_rearmed_after_completion() {
        let (mut engine, _driver, a, b) = engine_with_pair();

        engine.register_poll(b, PollEvent::Receive.into()).unwrap();
        engine
            .submit_send(a, OverlappedBuffer::from_vec(vec![1]))
            .unwrap();
        drain(&mut engine);

        // Completion cleared the pending flag; re-registering succeeds.
        assert!(engine.register_poll(b, PollEvent::Receive.into()).is_ok());
    }

    #[test]
    fn test_receive_hands_buffer_back() {
        let (mut engine, _driver, a, b) = engine_with_pair();

        engine
            .submit_send(a, OverlappedBuffer::from_vec(vec![5, 6, 7]))
            .unwrap();
        engine
            .submit_receive(b, OverlappedBuffer::with_capacity(16))
            .unwrap();

        let completions = drain(&mut engine);
        let recv = completions.iter().find(|c| c.op == OpKind::Receive).unwrap();
        assert_eq!(recv.bytes, 3);
        assert_eq!(recv.socket, b);
        let buffer = recv.buffer.as_ref().expect("buffer returned on completion");
        assert_eq!(buffer.contiguous(3), vec![5, 6, 7]);
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_cancel_surfaces_canceled_completion() {
        let (mut engine, _driver, _a, b) = engine_with_pair();

        let token = engine
            .submit_receive(b, OverlappedBuffer::with_capacity(32))
            .unwrap();
        assert!(engine.has_pending(b));

        engine.cancel(b).unwrap();
        // The buffer is not reclaimable until the canceled completion is
        // observed; in-flight accounting still holds the slot.
        assert_eq!(engine.in_flight(), 1);

        let completions = drain(&mut engine);
        assert_eq!(completions.len(), 1);
        let completion = &completions[0];
        assert_eq!(completion.token, token);
        assert!(completion.status.is_canceled());
        assert_eq!(completion.buffer.as_ref().unwrap().total_len(), 32);
        assert_eq!(engine.in_flight(), 0);
        assert!(!engine.has_pending(b));
    }

    #[test]
    fn test_per_socket_submission_order() {
        let (mut engine, _driver, a, b) = engine_with_pair();

        let tokens: Vec<Token> = (0..4)
            .map(|_| {
                engine
                    .submit_receive(b, OverlappedBuffer::with_capacity(2))
                    .unwrap()
            })
            .collect();
        engine
            .submit_send(a, OverlappedBuffer::from_vec(vec![0; 8]))
            .unwrap();

        let observed: Vec<Token> = drain(&mut engine)
            .into_iter()
            .filter(|c| c.op == OpKind::Receive)
            .map(|c| c.token)
            .collect();
        assert_eq!(observed, tokens);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let (mut engine, _driver, _a, b) = engine_with_pair();

        assert!(matches!(
            engine.register_poll(b, PollEvents::empty()),
            Err(NetError::BadInput(_))
        ));
        assert!(matches!(
            engine.submit_receive(b, OverlappedBuffer::from_vec(vec![])),
            Err(NetError::BadInput(_))
        ));
    }

    #[test]
    fn test_unknown_socket_rejected_and_slot_released() {
        let (mut engine, _driver, _a, _b) = engine_with_pair();

        let bogus = SocketId(9999);
        assert!(matches!(
            engine.submit_receive(bogus, OverlappedBuffer::with_capacity(4)),
            Err(NetError::UnknownSocket(_))
        ));
        // The failed submission released its slot.
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_graceful_close_distinguished_from_error() {
        let (mut engine, driver, a, b) = engine_with_pair();

        engine
            .submit_receive(b, OverlappedBuffer::with_capacity(4))
            .unwrap();
        driver.close(a).unwrap();

        let completions = drain(&mut engine);
        let recv = &completions[0];
        assert_eq!(recv.status, CompletionStatus::Success);
        assert_eq!(recv.bytes, 0);

        // An aborted connection reports an error, not a zero-byte success.
        let (c, d) = driver.socket_pair();
        engine
            .submit_receive(d, OverlappedBuffer::with_capacity(4))
            .unwrap();
        driver.abort(c).unwrap();
        let completions = drain(&mut engine);
        assert!(matches!(completions[0].status, CompletionStatus::Error(_)));
    }

    #[test]
    fn test_datagram_peer_address() {
        let driver = LoopbackDriver::new();
        let (a, b) = driver.datagram_pair();
        let a_addr = driver.addr_of(a).unwrap();
        let mut engine = AsyncSocketEngine::new(Box::new(driver));

        engine
            .submit_send(a, OverlappedBuffer::from_vec(vec![42]))
            .unwrap();
        engine
            .submit_receive_datagram(b, OverlappedBuffer::with_capacity(4))
            .unwrap();

        let completions = drain(&mut engine);
        let recv = completions
            .iter()
            .find(|c| c.op == OpKind::ReceiveDatagram)
            .unwrap();
        assert_eq!(recv.peer, Some(a_addr));
        assert_eq!(recv.bytes, 1);
    }

    #[test]
    fn test_slot_table_generation_guards_reuse() {
        let mut table = SlotTable::new();
        let token = table
            .insert(InFlight {
                socket: SocketId(1),
                op: OpKind::Receive,
            })
            .unwrap();
        assert!(table.remove(token).is_some());
        // Same index now carries a new generation; the stale token misses.
        assert!(table.remove(token).is_none());

        let token2 = table
            .insert(InFlight {
                socket: SocketId(2),
                op: OpKind::Send,
            })
            .unwrap();
        assert_ne!(token, token2);
        assert!(table.remove(token2).is_some());
    }

    #[test]
    fn test_slot_table_capacity() {
        let mut table = SlotTable::new();
        let tokens: Vec<Token> = (0..MAX_IN_FLIGHT)
            .map(|i| {
                table
                    .insert(InFlight {
                        socket: SocketId(i as u64),
                        op: OpKind::Receive,
                    })
                    .unwrap()
            })
            .collect();
        assert!(matches!(
            table.insert(InFlight {
                socket: SocketId(0),
                op: OpKind::Receive,
            }),
            Err(NetError::AllocFailed)
        ));

        table.remove(tokens[0]);
        assert!(table
            .insert(InFlight {
                socket: SocketId(0),
                op: OpKind::Receive,
            })
            .is_ok());
    }
}
