//! Content digests over payload bytes, optionally bound to a random salt.
//!
//! The salted form hashes `payload || salt`. Both the generating and the
//! verifying side go through [`DigestEngine::recompute`], so the
//! concatenation order lives in exactly one place.

use std::fmt;
use std::marker::PhantomData;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of a freshly generated salt.
pub const SALT_LEN: usize = 32;

/// Length in characters of a SHA-256 digest rendered as hex.
pub const DIGEST_HEX_LEN: usize = 64;

/// Errors raised by the digest engine.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The secure random source could not produce a salt.
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(#[from] rand::Error),
    #[error("digest must be {expected} lowercase hex characters, got {actual:?}")]
    InvalidDigest { expected: usize, actual: String },
}

/// A content digest as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    fn from_hash_bytes(bytes: &[u8]) -> Self {
        Self(data_encoding::HEXLOWER.encode(bytes))
    }

    /// Parse a SHA-256 digest, accepting only 64 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let well_formed = s.len() == DIGEST_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(DigestError::InvalidDigest {
                expected: DIGEST_HEX_LEN,
                actual: s.to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Wrap a digest string without checking its shape.
    ///
    /// Used for values received off the wire, where a malformed digest must
    /// still reach verification and fail there.
    pub fn from_wire(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ContentDigest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Random bytes appended to the payload before hashing. Empty means unsalted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// The empty salt used by unsalted transfers.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Draw a fresh [`SALT_LEN`]-byte salt from `rng`.
    ///
    /// A failing random source is an error; there is no weaker fallback.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Result<Self, DigestError> {
        let mut bytes = vec![0u8; SALT_LEN];
        rng.try_fill_bytes(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<[u8]> for Salt {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Stateless digest engine parameterised over the hash algorithm.
///
/// The random source for salts is passed per call rather than held, so the
/// engine can be shared freely across tasks and tests can hand in a seeded
/// generator.
pub struct DigestEngine<H = Sha256> {
    _hash: PhantomData<fn() -> H>,
}

impl<H> Clone for DigestEngine<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for DigestEngine<H> {}

impl<H> fmt::Debug for DigestEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestEngine")
            .field("hash", &std::any::type_name::<H>())
            .finish()
    }
}

impl<H: Digest> Default for DigestEngine<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Digest> DigestEngine<H> {
    pub fn new() -> Self {
        Self {
            _hash: PhantomData,
        }
    }

    /// Number of hex characters in digests produced by this engine.
    pub fn digest_hex_len(&self) -> usize {
        <H as Digest>::output_size() * 2
    }

    /// Hash the payload alone.
    pub fn compute(&self, payload: &[u8]) -> ContentDigest {
        self.recompute(payload, &[])
    }

    /// Generate a fresh salt and hash `payload || salt`.
    pub fn compute_salted<R: RngCore + CryptoRng + ?Sized>(
        &self,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<(ContentDigest, Salt), DigestError> {
        let salt = Salt::generate(rng)?;
        let digest = self.recompute(payload, salt.as_bytes());
        Ok((digest, salt))
    }

    /// Hash `payload || salt`; an empty salt yields the unsalted digest.
    pub fn recompute(&self, payload: &[u8], salt: &[u8]) -> ContentDigest {
        let hash = H::new().chain_update(payload).chain_update(salt).finalize();
        ContentDigest::from_hash_bytes(&hash)
    }

    /// Recompute the digest and compare it to `expected` by exact string equality.
    pub fn verify(&self, payload: &[u8], salt: &[u8], expected: &str) -> bool {
        self.recompute(payload, salt) == *expected
    }
}

/// SHA-256 of the payload bytes.
pub fn compute_digest(payload: &[u8]) -> ContentDigest {
    DigestEngine::<Sha256>::new().compute(payload)
}

/// SHA-256 of `payload || salt` with a salt drawn from the operating system.
pub fn compute_digest_with_salt(payload: &[u8]) -> Result<(ContentDigest, Salt), DigestError> {
    DigestEngine::<Sha256>::new().compute_salted(payload, &mut OsRng)
}

/// Check `expected` against the SHA-256 of `payload || salt`.
pub fn verify_digest(payload: &[u8], salt: &[u8], expected: &str) -> bool {
    DigestEngine::<Sha256>::new().verify(payload, salt, expected)
}
