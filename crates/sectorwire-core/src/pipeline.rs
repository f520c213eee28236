//! The transfer pipeline.
//!
//! Send path: sector blocks are read from the stream, absorbed into the
//! digest session, and submitted to the socket engine; when the bounded
//! in-flight budget is reached the pipeline blocks on completions to
//! reclaim buffers before reading further. On stream exhaustion the
//! digest is finalized and transmitted as a trailer (one kind byte plus
//! the digest bytes). The receive path is symmetric and ends by comparing
//! the computed digest with the transmitted one; any difference surfaces
//! as an integrity mismatch, never as success.
//!
//! Any fatal error cancels the socket and drains pending completions,
//! releasing every in-flight buffer, before returning control.

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::stream::SectorStream;
use sectorwire_digest::{bytes_to_hex, registry, DigestKind, DigestSession};
use sectorwire_net::{
    AsyncSocketEngine, CompletionStatus, OpKind, OverlappedBuffer, SocketId,
};
use sectorwire_topology::TopologyError;
use std::time::{Duration, Instant};

/// Outcome of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Payload bytes moved, excluding the trailer
    pub bytes: u64,
    /// Blocks submitted or written
    pub blocks: u64,
    /// Final digest over the payload
    pub digest: Vec<u8>,
    /// Digest algorithm used
    pub kind: DigestKind,
    /// Wall-clock duration of the transfer
    pub elapsed: Duration,
}

/// Encode the integrity trailer: one kind byte, then the digest
pub fn encode_trailer(kind: DigestKind, digest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + digest.len());
    out.push(kind.wire());
    out.extend_from_slice(digest);
    out
}

/// Decode and validate an integrity trailer
pub fn decode_trailer(bytes: &[u8]) -> Result<(DigestKind, Vec<u8>)> {
    let (kind_byte, digest) = bytes
        .split_first()
        .ok_or(Error::BadInput("empty trailer"))?;
    let kind = DigestKind::from_wire(*kind_byte)
        .ok_or(Error::BadInput("unknown digest kind in trailer"))?;
    let descriptor =
        registry::lookup_by_kind(kind).ok_or(Error::BadInput("unregistered digest kind"))?;
    if digest.len() != descriptor.size() {
        return Err(Error::BadInput("trailer length does not match digest size"));
    }
    Ok((kind, digest.to_vec()))
}

/// Drives full transfers over one socket engine
pub struct TransferPipeline {
    engine: AsyncSocketEngine,
    config: TransferConfig,
}

impl TransferPipeline {
    /// Create a pipeline over an engine
    pub fn new(engine: AsyncSocketEngine, config: TransferConfig) -> Self {
        Self { engine, config }
    }

    /// The underlying engine, for socket registration and direct polling
    pub fn engine_mut(&mut self) -> &mut AsyncSocketEngine {
        &mut self.engine
    }

    /// Send one partition's sectors followed by the digest trailer
    pub fn send(
        &mut self,
        stream: &mut SectorStream,
        kind: DigestKind,
        socket: SocketId,
    ) -> Result<TransferReport> {
        let result = self.send_inner(stream, kind, socket);
        if result.is_err() {
            self.abandon(socket);
        }
        result
    }

    /// Receive one partition's sectors, verify the trailer, and report
    pub fn receive(
        &mut self,
        stream: &mut SectorStream,
        kind: DigestKind,
        socket: SocketId,
    ) -> Result<TransferReport> {
        let result = self.receive_inner(stream, kind, socket);
        if result.is_err() {
            self.abandon(socket);
        }
        result
    }

    fn send_inner(
        &mut self,
        stream: &mut SectorStream,
        kind: DigestKind,
        socket: SocketId,
    ) -> Result<TransferReport> {
        let start = Instant::now();
        let descriptor =
            registry::lookup_by_kind(kind).ok_or(Error::BadInput("unknown digest kind"))?;
        self.check_block_size(stream)?;

        let mut session = DigestSession::new(descriptor);
        session.start()?;

        let mut in_flight = 0usize;
        let mut bytes_sent = 0u64;
        let mut blocks = 0u64;
        let mut buf = vec![0u8; self.config.block_size];

        loop {
            while in_flight >= self.config.max_in_flight {
                in_flight -= self.reap(socket)?;
            }

            let n = stream.read_next(&mut buf)?;
            if n == 0 {
                break;
            }
            session.update(&buf[..n])?;
            self.engine
                .submit_send(socket, OverlappedBuffer::from_vec(buf[..n].to_vec()))?;
            in_flight += 1;
            bytes_sent += n as u64;
            blocks += 1;
        }

        let digest = session.finish()?;
        self.engine.submit_send(
            socket,
            OverlappedBuffer::from_vec(encode_trailer(kind, &digest)),
        )?;
        in_flight += 1;

        while in_flight > 0 {
            in_flight -= self.reap(socket)?;
        }

        tracing::debug!(
            "sent {} bytes in {} blocks with {} trailer",
            bytes_sent,
            blocks,
            descriptor.name()
        );

        Ok(TransferReport {
            bytes: bytes_sent,
            blocks,
            digest,
            kind,
            elapsed: start.elapsed(),
        })
    }

    fn receive_inner(
        &mut self,
        stream: &mut SectorStream,
        kind: DigestKind,
        socket: SocketId,
    ) -> Result<TransferReport> {
        let start = Instant::now();
        let descriptor =
            registry::lookup_by_kind(kind).ok_or(Error::BadInput("unknown digest kind"))?;
        self.check_block_size(stream)?;

        let mut session = DigestSession::new(descriptor);
        session.start()?;

        let bps = usize::try_from(stream.map().bytes_per_sector()).unwrap_or(512);
        let payload_total = stream.remaining_bytes();
        let trailer_len = 1 + descriptor.size();
        let expected_total = payload_total + trailer_len as u64;

        let mut payload_received = 0u64;
        let mut blocks = 0u64;
        let mut staging: Vec<u8> = Vec::with_capacity(self.config.block_size + bps);
        let mut trailer: Vec<u8> = Vec::with_capacity(trailer_len);
        let mut in_flight = 0usize;

        while payload_received < payload_total || trailer.len() < trailer_len {
            while in_flight < self.config.max_in_flight {
                self.engine.submit_receive(
                    socket,
                    OverlappedBuffer::with_capacity(self.config.block_size),
                )?;
                in_flight += 1;
            }

            for completion in self.engine.poll_completions(None)? {
                if completion.socket != socket {
                    continue;
                }
                in_flight -= 1;
                match completion.status {
                    CompletionStatus::Success => {}
                    CompletionStatus::Canceled => return Err(Error::Canceled),
                    CompletionStatus::Error(code) => return Err(Error::SocketError(code)),
                }
                if completion.op != OpKind::Receive {
                    continue;
                }
                if completion.bytes == 0 {
                    // Graceful peer close; premature because the loop
                    // condition says bytes are still owed.
                    return Err(Error::PeerClosed {
                        received: payload_received + trailer.len() as u64,
                        expected: expected_total,
                    });
                }

                let buffer = completion
                    .buffer
                    .ok_or(Error::BadInput("receive completion without buffer"))?;
                let chunk = buffer.contiguous(completion.bytes);

                let payload_part =
                    usize::try_from((payload_total - payload_received).min(chunk.len() as u64))
                        .unwrap_or(chunk.len());
                if payload_part > 0 {
                    session.update(&chunk[..payload_part])?;
                    staging.extend_from_slice(&chunk[..payload_part]);
                    payload_received += payload_part as u64;

                    let flushable = staging.len() - staging.len() % bps;
                    if flushable > 0 {
                        stream.write_next(&staging[..flushable])?;
                        staging.drain(..flushable);
                        blocks += 1;
                    }
                }
                if chunk.len() > payload_part {
                    trailer.extend_from_slice(&chunk[payload_part..]);
                    if trailer.len() > trailer_len {
                        return Err(Error::BadInput("unexpected bytes after trailer"));
                    }
                }
            }
        }

        if !staging.is_empty() {
            stream.write_next(&staging)?;
        }
        stream.sync()?;
        self.settle(socket, in_flight)?;

        let computed = session.finish()?;
        let (wire_kind, wire_digest) = decode_trailer(&trailer)?;
        if wire_kind != kind {
            return Err(Error::BadInput("trailer digest kind differs from expected"));
        }
        if wire_digest != computed {
            return Err(Error::IntegrityMismatch {
                expected: bytes_to_hex(&wire_digest),
                actual: bytes_to_hex(&computed),
            });
        }

        Ok(TransferReport {
            bytes: payload_received,
            blocks,
            digest: computed,
            kind,
            elapsed: start.elapsed(),
        })
    }

    fn check_block_size(&self, stream: &SectorStream) -> Result<()> {
        let bps = stream.map().bytes_per_sector();
        if self.config.block_size as u64 % u64::from(bps) != 0 {
            return Err(TopologyError::InvalidSectorSize {
                size: self.config.block_size as u64,
                sector_size: bps,
            }
            .into());
        }
        Ok(())
    }

    /// Block for completions on `socket`, surfacing error statuses;
    /// returns how many operations were reclaimed
    fn reap(&mut self, socket: SocketId) -> Result<usize> {
        let completions = self.engine.poll_completions(None)?;
        let mut reclaimed = 0;
        for completion in completions {
            if completion.socket != socket {
                continue;
            }
            reclaimed += 1;
            match completion.status {
                CompletionStatus::Success => {}
                CompletionStatus::Canceled => return Err(Error::Canceled),
                CompletionStatus::Error(code) => return Err(Error::SocketError(code)),
            }
        }
        Ok(reclaimed)
    }

    /// Cancel and drain whatever is still outstanding on `socket` so every
    /// buffer's ownership is released; statuses are irrelevant here
    fn settle(&mut self, socket: SocketId, mut in_flight: usize) -> Result<()> {
        if in_flight == 0 {
            return Ok(());
        }
        self.engine.cancel(socket)?;
        while in_flight > 0 {
            let completions = self
                .engine
                .poll_completions(Some(Duration::from_millis(500)))?;
            if completions.is_empty() {
                return Err(Error::BadInput("outstanding operations failed to drain"));
            }
            for completion in completions {
                if completion.socket == socket {
                    in_flight -= 1;
                }
            }
        }
        Ok(())
    }

    /// Best-effort teardown after a fatal error: request cancellation and
    /// consume completions until nothing is left in flight
    fn abandon(&mut self, socket: SocketId) {
        let _ = self.engine.cancel(socket);
        for _ in 0..64 {
            if self.engine.in_flight() == 0 {
                break;
            }
            match self
                .engine
                .poll_completions(Some(Duration::from_millis(100)))
            {
                Ok(completions) if completions.is_empty() => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_round_trip() {
        for kind in registry::list() {
            let descriptor = registry::lookup_by_kind(*kind).unwrap();
            let digest = vec![0xAB; descriptor.size()];
            let encoded = encode_trailer(*kind, &digest);
            assert_eq!(encoded.len(), 1 + descriptor.size());
            assert_eq!(encoded[0], kind.wire());

            let (back_kind, back_digest) = decode_trailer(&encoded).unwrap();
            assert_eq!(back_kind, *kind);
            assert_eq!(back_digest, digest);
        }
    }

    #[test]
    fn test_trailer_rejects_malformed() {
        assert!(matches!(
            decode_trailer(&[]),
            Err(Error::BadInput("empty trailer"))
        ));
        assert!(matches!(
            decode_trailer(&[0x00, 1, 2, 3]),
            Err(Error::BadInput(_))
        ));
        assert!(matches!(
            decode_trailer(&[0xFF; 33]),
            Err(Error::BadInput(_))
        ));

        // Right kind, wrong digest length
        let mut short = encode_trailer(DigestKind::Sha256, &[0u8; 32]);
        short.pop();
        assert!(matches!(decode_trailer(&short), Err(Error::BadInput(_))));
    }
}
