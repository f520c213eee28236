//! Static catalog of available digest algorithms.
//!
//! The registry is fixed at process start: four SHA-2 family descriptors,
//! each exposing the same capability set (streaming digest, keyed HMAC,
//! one-shot forms). Descriptors live for the process lifetime and are safe
//! to share across threads; sessions created from them are not.

use crate::{DigestError, Result};
use hmac::digest::{FixedOutputReset, Reset};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Identity of a supported digest algorithm.
///
/// The discriminants are the one-byte enumerants used on the wire in the
/// transfer trailer; zero is reserved for "no digest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DigestKind {
    /// SHA-224 (28-byte output)
    Sha224 = 1,
    /// SHA-256 (32-byte output)
    Sha256 = 2,
    /// SHA-384 (48-byte output)
    Sha384 = 3,
    /// SHA-512 (64-byte output)
    Sha512 = 4,
}

impl DigestKind {
    /// One-byte wire value of this kind
    pub fn wire(self) -> u8 {
        self as u8
    }

    /// Decode a wire value back into a kind
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(DigestKind::Sha224),
            2 => Some(DigestKind::Sha256),
            3 => Some(DigestKind::Sha384),
            4 => Some(DigestKind::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for DigestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match lookup_by_kind(*self) {
            Some(descriptor) => write!(f, "{}", descriptor.name()),
            None => write!(f, "unknown"),
        }
    }
}

/// Capability set of one digest algorithm.
///
/// One implementation exists per algorithm variant, registered once and
/// never mutated. Callers hold `&'static dyn DigestDescriptor` and reach
/// every operation through it; the concrete compression functions live in
/// the `sha2` crate behind this interface.
pub trait DigestDescriptor: Send + Sync {
    /// Algorithm identity
    fn kind(&self) -> DigestKind;

    /// Human-readable algorithm name
    fn name(&self) -> &'static str;

    /// Output length in bytes (at most [`crate::MAX_DIGEST_SIZE`])
    fn size(&self) -> usize;

    /// Allocate fresh streaming-digest working state
    fn allocate(&self) -> Result<Box<dyn DigestState>>;

    /// Allocate keyed HMAC working state; the key schedule is computed once
    /// here and survives [`HmacState::reset`]
    fn allocate_hmac(&self, key: &[u8]) -> Result<Box<dyn HmacState>>;
}

/// Algorithm-specific working state of a streaming digest.
///
/// Obtained from [`DigestDescriptor::allocate`]; owned by exactly one
/// session and driven from one thread.
pub trait DigestState: Send {
    /// Absorb input bytes in any chunking
    fn update(&mut self, data: &[u8]);

    /// Pad, finalize, and write exactly `descriptor.size()` bytes into
    /// `out`, leaving the state ready for a fresh message
    fn finish(&mut self, out: &mut [u8]);
}

/// Algorithm-specific working state of a keyed HMAC.
pub trait HmacState: Send {
    /// Absorb input bytes in any chunking
    fn update(&mut self, data: &[u8]);

    /// Finalize and write exactly `descriptor.size()` bytes into `out`,
    /// restoring the post-key-schedule state as a side effect
    fn finish(&mut self, out: &mut [u8]);

    /// Restore the post-key-schedule state, discarding any absorbed input,
    /// without recomputing the key expansion
    fn reset(&mut self);
}

struct StreamState<D> {
    hasher: D,
}

impl<D> DigestState for StreamState<D>
where
    D: Digest + FixedOutputReset + Send,
{
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finish(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&Digest::finalize_reset(&mut self.hasher));
    }
}

struct KeyedState<M> {
    mac: M,
}

impl<M> HmacState for KeyedState<M>
where
    M: Mac + FixedOutputReset + Reset + Send,
{
    fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.mac, data);
    }

    fn finish(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.mac.finalize_reset().into_bytes());
    }

    fn reset(&mut self) {
        Reset::reset(&mut self.mac);
    }
}

macro_rules! sha_descriptor {
    ($descriptor:ident, $algo:ty, $kind:expr, $name:literal, $size:expr) => {
        struct $descriptor;

        impl DigestDescriptor for $descriptor {
            fn kind(&self) -> DigestKind {
                $kind
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn size(&self) -> usize {
                $size
            }

            fn allocate(&self) -> Result<Box<dyn DigestState>> {
                Ok(Box::new(StreamState {
                    hasher: <$algo>::new(),
                }))
            }

            fn allocate_hmac(&self, key: &[u8]) -> Result<Box<dyn HmacState>> {
                let mac = <Hmac<$algo>>::new_from_slice(key)
                    .map_err(|_| DigestError::BadInput("invalid HMAC key length"))?;
                Ok(Box::new(KeyedState { mac }))
            }
        }
    };
}

sha_descriptor!(Sha224Descriptor, Sha224, DigestKind::Sha224, "SHA-224", 28);
sha_descriptor!(Sha256Descriptor, Sha256, DigestKind::Sha256, "SHA-256", 32);
sha_descriptor!(Sha384Descriptor, Sha384, DigestKind::Sha384, "SHA-384", 48);
sha_descriptor!(Sha512Descriptor, Sha512, DigestKind::Sha512, "SHA-512", 64);

static SHA224: Sha224Descriptor = Sha224Descriptor;
static SHA256: Sha256Descriptor = Sha256Descriptor;
static SHA384: Sha384Descriptor = Sha384Descriptor;
static SHA512: Sha512Descriptor = Sha512Descriptor;

static KINDS: [DigestKind; 4] = [
    DigestKind::Sha224,
    DigestKind::Sha256,
    DigestKind::Sha384,
    DigestKind::Sha512,
];

/// Stable ordered sequence of the available digest kinds
pub fn list() -> &'static [DigestKind] {
    &KINDS
}

/// Look up the descriptor for a digest kind
pub fn lookup_by_kind(kind: DigestKind) -> Option<&'static dyn DigestDescriptor> {
    match kind {
        DigestKind::Sha224 => Some(&SHA224),
        DigestKind::Sha256 => Some(&SHA256),
        DigestKind::Sha384 => Some(&SHA384),
        DigestKind::Sha512 => Some(&SHA512),
    }
}

/// Look up a descriptor by name.
///
/// Matching is case-insensitive and tolerates a missing dash, so both
/// `"SHA-256"` and `"sha256"` resolve.
pub fn lookup_by_name(name: &str) -> Option<&'static dyn DigestDescriptor> {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase();

    KINDS
        .iter()
        .filter_map(|kind| lookup_by_kind(*kind))
        .find(|descriptor| {
            descriptor
                .name()
                .chars()
                .filter(|c| *c != '-')
                .collect::<String>()
                .to_lowercase()
                == normalized
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_stable_and_complete() {
        let kinds = list();
        assert_eq!(
            kinds,
            &[
                DigestKind::Sha224,
                DigestKind::Sha256,
                DigestKind::Sha384,
                DigestKind::Sha512,
            ]
        );
    }

    #[test]
    fn test_lookup_by_kind() {
        for kind in list() {
            let descriptor = lookup_by_kind(*kind).expect("descriptor for listed kind");
            assert_eq!(descriptor.kind(), *kind);
            assert!(descriptor.size() <= crate::MAX_DIGEST_SIZE);
        }
    }

    #[test]
    fn test_lookup_by_name_variants() {
        assert!(lookup_by_name("SHA-256").is_some());
        assert!(lookup_by_name("sha256").is_some());
        assert!(lookup_by_name("Sha-512").is_some());
        assert!(lookup_by_name("md5").is_none());
        assert!(lookup_by_name("").is_none());

        let descriptor = lookup_by_name("sha384").unwrap();
        assert_eq!(descriptor.kind(), DigestKind::Sha384);
        assert_eq!(descriptor.size(), 48);
    }

    #[test]
    fn test_descriptor_sizes() {
        assert_eq!(lookup_by_kind(DigestKind::Sha224).unwrap().size(), 28);
        assert_eq!(lookup_by_kind(DigestKind::Sha256).unwrap().size(), 32);
        assert_eq!(lookup_by_kind(DigestKind::Sha384).unwrap().size(), 48);
        assert_eq!(lookup_by_kind(DigestKind::Sha512).unwrap().size(), 64);
    }

    #[test]
    fn test_wire_round_trip() {
        for kind in list() {
            assert_eq!(DigestKind::from_wire(kind.wire()), Some(*kind));
        }
        assert_eq!(DigestKind::from_wire(0), None);
        assert_eq!(DigestKind::from_wire(5), None);
        assert_eq!(DigestKind::from_wire(255), None);
    }

    #[test]
    fn test_display_uses_descriptor_name() {
        assert_eq!(DigestKind::Sha256.to_string(), "SHA-256");
        assert_eq!(DigestKind::Sha512.to_string(), "SHA-512");
    }
}
