//! Digest and HMAC sessions over a bound descriptor.
//!
//! A session binds one registry descriptor and drives it through a small
//! state machine: `start` allocates working state, `update` absorbs bytes
//! in any chunking, `finish` produces exactly `descriptor.size()` bytes and
//! makes the session unusable until re-started. The keyed variant adds
//! `reset`, which restores the post-key-schedule state without redoing key
//! expansion.

use crate::registry::{DigestDescriptor, DigestState, HmacState};
use crate::{DigestError, Result};

enum SessionState<S> {
    Uninitialized,
    Active(S),
    Finished(S),
}

impl<S> SessionState<S> {
    fn take(&mut self) -> SessionState<S> {
        std::mem::replace(self, SessionState::Uninitialized)
    }
}

/// Streaming digest session bound to one descriptor.
///
/// Not safe for concurrent `update` calls; confine a session to the thread
/// driving its stream or serialize access externally.
pub struct DigestSession {
    descriptor: &'static dyn DigestDescriptor,
    state: SessionState<Box<dyn DigestState>>,
}

impl DigestSession {
    /// Bind a session to a descriptor without allocating working state
    pub fn new(descriptor: &'static dyn DigestDescriptor) -> Self {
        Self {
            descriptor,
            state: SessionState::Uninitialized,
        }
    }

    /// The descriptor this session is bound to
    pub fn descriptor(&self) -> &'static dyn DigestDescriptor {
        self.descriptor
    }

    /// Allocate working state and enter the active state.
    ///
    /// Restarting a finished session reuses its allocation; the algorithm
    /// state is already rewound by `finish`.
    pub fn start(&mut self) -> Result<()> {
        self.state = match self.state.take() {
            SessionState::Uninitialized => SessionState::Active(self.descriptor.allocate()?),
            SessionState::Active(state) | SessionState::Finished(state) => {
                let mut state = state;
                let mut scratch = [0u8; crate::MAX_DIGEST_SIZE];
                // An active session may hold absorbed input; finishing into
                // scratch rewinds it to a fresh message.
                state.finish(&mut scratch[..self.descriptor.size()]);
                SessionState::Active(state)
            }
        };
        Ok(())
    }

    /// Absorb input bytes; callable any number of times while active
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            SessionState::Active(state) => {
                state.update(data);
                Ok(())
            }
            SessionState::Uninitialized => Err(DigestError::BadInput("session not started")),
            SessionState::Finished(_) => Err(DigestError::BadInput("session already finished")),
        }
    }

    /// Finalize and return exactly `descriptor.size()` bytes.
    ///
    /// The session must be re-`start`ed before further updates.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        match self.state.take() {
            SessionState::Active(mut state) => {
                let mut output = vec![0u8; self.descriptor.size()];
                state.finish(&mut output);
                self.state = SessionState::Finished(state);
                Ok(output)
            }
            SessionState::Uninitialized => Err(DigestError::BadInput("session not started")),
            SessionState::Finished(state) => {
                self.state = SessionState::Finished(state);
                Err(DigestError::BadInput("session already finished"))
            }
        }
    }
}

/// Keyed HMAC session bound to one descriptor.
///
/// The key schedule is computed once in [`HmacSession::start`]; repeated
/// digests over the same key go through [`HmacSession::reset`] instead of
/// re-keying.
pub struct HmacSession {
    descriptor: &'static dyn DigestDescriptor,
    state: SessionState<Box<dyn HmacState>>,
}

impl HmacSession {
    /// Bind a session to a descriptor without allocating working state
    pub fn new(descriptor: &'static dyn DigestDescriptor) -> Self {
        Self {
            descriptor,
            state: SessionState::Uninitialized,
        }
    }

    /// The descriptor this session is bound to
    pub fn descriptor(&self) -> &'static dyn DigestDescriptor {
        self.descriptor
    }

    /// Run the key schedule and enter the active state
    pub fn start(&mut self, key: &[u8]) -> Result<()> {
        self.state = SessionState::Active(self.descriptor.allocate_hmac(key)?);
        Ok(())
    }

    /// Absorb input bytes; callable any number of times while active
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            SessionState::Active(state) => {
                state.update(data);
                Ok(())
            }
            SessionState::Uninitialized => Err(DigestError::BadInput("session not keyed")),
            SessionState::Finished(_) => Err(DigestError::BadInput("session already finished")),
        }
    }

    /// Finalize and return exactly `descriptor.size()` bytes.
    ///
    /// The keyed state survives; call [`HmacSession::reset`] to compute
    /// another digest under the same key.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        match self.state.take() {
            SessionState::Active(mut state) => {
                let mut output = vec![0u8; self.descriptor.size()];
                state.finish(&mut output);
                self.state = SessionState::Finished(state);
                Ok(output)
            }
            SessionState::Uninitialized => Err(DigestError::BadInput("session not keyed")),
            SessionState::Finished(state) => {
                self.state = SessionState::Finished(state);
                Err(DigestError::BadInput("session already finished"))
            }
        }
    }

    /// Restore the post-key-schedule state, discarding absorbed input.
    ///
    /// Valid from the active or finished state; the key expansion is not
    /// recomputed.
    pub fn reset(&mut self) -> Result<()> {
        self.state = match self.state.take() {
            SessionState::Active(mut state) | SessionState::Finished(mut state) => {
                state.reset();
                SessionState::Active(state)
            }
            SessionState::Uninitialized => {
                return Err(DigestError::BadInput("session not keyed"));
            }
        };
        Ok(())
    }
}

/// One-shot digest of a buffer, equivalent to start + update + finish
pub fn digest(descriptor: &'static dyn DigestDescriptor, data: &[u8]) -> Result<Vec<u8>> {
    let mut session = DigestSession::new(descriptor);
    session.start()?;
    session.update(data)?;
    session.finish()
}

/// One-shot HMAC of a buffer, equivalent to start + update + finish
pub fn hmac(descriptor: &'static dyn DigestDescriptor, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut session = HmacSession::new(descriptor);
    session.start(key)?;
    session.update(data)?;
    session.finish()
}
