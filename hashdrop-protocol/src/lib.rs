//! Digest engine, transfer envelope, and wire formats for hashdrop.

pub mod digest;
pub mod envelope;

#[cfg(test)]
mod proptests;

pub use digest::{
    compute_digest, compute_digest_with_salt, verify_digest, ContentDigest, DigestEngine,
    DigestError, Salt, DIGEST_HEX_LEN, SALT_LEN,
};
pub use envelope::{
    decode_envelope, decode_verdict, encode_envelope, encode_verdict, EnvelopeError, SaltingMode,
    TransferEnvelope, UploadVerdict,
};
