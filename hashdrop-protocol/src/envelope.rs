//! Transfer envelope and upload verdict: the two JSON documents exchanged
//! between sender and receiver.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::digest::{ContentDigest, DigestEngine, DigestError, Salt};

/// Serde helper: `Vec<u8>` as a standard base64 string rather than a JSON array of numbers.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

mod base64_salt {
    use serde::{Deserializer, Serializer};

    use crate::digest::Salt;

    pub fn serialize<S>(salt: &Salt, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::base64_bytes::serialize(salt.as_bytes(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Salt, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::base64_bytes::deserialize(deserializer).map(Salt::from_bytes)
    }
}

/// Errors when encoding, decoding, or validating wire documents.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope has no file name")]
    MissingName,
    #[error("envelope payload is empty")]
    EmptyPayload,
}

/// How the receiver recomputes the digest, decided by salt presence alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltingMode {
    Salted,
    Unsalted,
}

/// The unit a sender transmits: file name, declared size, digest, salt, payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEnvelope {
    /// Display/storage name. Not checked for path safety here.
    #[serde(rename = "FileName")]
    pub name: String,
    /// Byte count claimed by the sender. Informational only.
    #[serde(rename = "FileSize")]
    pub declared_size: u64,
    #[serde(rename = "Hash")]
    pub digest: ContentDigest,
    #[serde(rename = "Salt", with = "base64_salt", default)]
    pub salt: Salt,
    #[serde(rename = "FileData", with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Sender's salting preference. Carried for compatibility; verification
    /// never reads it.
    #[serde(rename = "UseSalt", default, skip_serializing_if = "Option::is_none")]
    pub use_salt: Option<bool>,
}

impl TransferEnvelope {
    /// Digest `payload` (salted when `use_salt` is set) and wrap the result.
    pub fn seal<R: RngCore + CryptoRng + ?Sized>(
        name: impl Into<String>,
        payload: Vec<u8>,
        use_salt: bool,
        rng: &mut R,
    ) -> Result<Self, DigestError> {
        let engine = DigestEngine::<Sha256>::new();
        let (digest, salt) = if use_salt {
            engine.compute_salted(&payload, rng)?
        } else {
            (engine.compute(&payload), Salt::none())
        };

        Ok(Self {
            name: name.into(),
            declared_size: payload.len() as u64,
            digest,
            salt,
            payload,
            use_salt: Some(use_salt),
        })
    }

    pub fn salting_mode(&self) -> SaltingMode {
        if self.salt.is_empty() {
            SaltingMode::Unsalted
        } else {
            SaltingMode::Salted
        }
    }

    /// True when the carried `UseSalt` flag disagrees with the salt bytes.
    pub fn has_conflicting_salt_flag(&self) -> bool {
        match self.use_salt {
            Some(flag) => flag != (self.salting_mode() == SaltingMode::Salted),
            None => false,
        }
    }

    /// Reject envelopes that cannot be processed at all.
    ///
    /// The digest is not checked here; a malformed digest fails verification
    /// instead, so a tampered digest field is always reported as an integrity
    /// failure.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.name.trim().is_empty() {
            return Err(EnvelopeError::MissingName);
        }
        if self.payload.is_empty() {
            return Err(EnvelopeError::EmptyPayload);
        }
        Ok(())
    }

    /// Recompute the digest over the actual payload bytes.
    pub fn recompute_digest(&self) -> ContentDigest {
        DigestEngine::<Sha256>::new().recompute(&self.payload, self.salt.as_bytes())
    }
}

/// Receiver's answer to one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadVerdict {
    /// The request was processed, independent of the integrity outcome.
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "FileName")]
    pub name: String,
    #[serde(rename = "FileSize")]
    pub declared_size: u64,
    #[serde(rename = "IntegrityValid")]
    pub integrity_valid: bool,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(
        rename = "ComputedHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub computed_digest: Option<ContentDigest>,
}

pub const MESSAGE_VERIFIED: &str = "File received and verified";
pub const MESSAGE_INTEGRITY_FAILED: &str = "File integrity check failed";

impl UploadVerdict {
    /// Build the verdict for a processed envelope.
    pub fn for_envelope(
        envelope: &TransferEnvelope,
        computed: ContentDigest,
        integrity_valid: bool,
    ) -> Self {
        let message = if integrity_valid {
            MESSAGE_VERIFIED
        } else {
            MESSAGE_INTEGRITY_FAILED
        };
        Self {
            success: true,
            name: envelope.name.clone(),
            declared_size: envelope.declared_size,
            integrity_valid,
            message: message.to_string(),
            computed_digest: Some(computed),
        }
    }
}

/// Serialize an envelope to JSON bytes.
pub fn encode_envelope(envelope: &TransferEnvelope) -> Result<Vec<u8>, EnvelopeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Deserialize an envelope from JSON bytes.
pub fn decode_envelope(data: &[u8]) -> Result<TransferEnvelope, EnvelopeError> {
    Ok(serde_json::from_slice(data)?)
}

/// Serialize a verdict to JSON bytes.
pub fn encode_verdict(verdict: &UploadVerdict) -> Result<Vec<u8>, EnvelopeError> {
    Ok(serde_json::to_vec(verdict)?)
}

/// Deserialize a verdict from JSON bytes.
pub fn decode_verdict(data: &[u8]) -> Result<UploadVerdict, EnvelopeError> {
    Ok(serde_json::from_slice(data)?)
}
