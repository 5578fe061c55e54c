//! Integrity-checked upload over a single request/response exchange.
//!
//! The sending side reads a file, digests it (optionally salted), ships the
//! envelope as one request, and classifies the answer. The receiving side
//! decodes the envelope, recomputes the digest over the bytes it actually got,
//! stores the payload, and answers with a verdict.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hashdrop_protocol::{
    decode_envelope, decode_verdict, encode_envelope, encode_verdict, ContentDigest, DigestEngine,
    DigestError, EnvelopeError, SaltingMode, TransferEnvelope, UploadVerdict,
};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::source::{SourceError, SourceFile};

/// Capacity of the sender's state broadcast channel.
const STATE_CHANNEL_CAPACITY: usize = 32;

/// A response as seen by the sender: status code and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures to complete a round trip with the receiver.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no response from {endpoint} within {}s", .after.as_secs())]
    Timeout { endpoint: String, after: Duration },
    #[error("connection to {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },
}

/// Request/response channel to a receiver.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Human-readable address of the receiver, used in error reports.
    fn endpoint(&self) -> String;

    /// Deliver one serialized envelope and wait for the single response.
    async fn exchange(&self, body: Vec<u8>) -> Result<RawResponse, TransportError>;
}

/// Where received payloads end up.
pub trait PayloadSink: Send + Sync {
    /// Store `payload` under `name`, returning where it was written.
    fn persist(&self, name: &str, payload: &[u8]) -> anyhow::Result<PathBuf>;

    /// Record the verdict for a stored payload.
    fn record(
        &self,
        _envelope: &TransferEnvelope,
        _verdict: &UploadVerdict,
        _stored_path: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sender lifecycle. Every send walks
/// `Idle → Preparing → Digesting → Sending → AwaitingResponse → <terminal> → Idle`,
/// where `<terminal>` is one of `Verified`, `IntegrityFailed`, `TransportError`
/// or `ServerError`. Sends that stop before anything goes on the wire skip the
/// terminal state: a rejected source goes `Preparing → Idle`, and a failed salt
/// draw (`SendError::Fatal`) goes `Preparing → Digesting → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Preparing,
    Digesting,
    Sending,
    AwaitingResponse,
    Verified,
    IntegrityFailed,
    TransportError,
    ServerError,
}

/// A completed exchange: the receiver processed the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Verified(UploadVerdict),
    IntegrityFailed(UploadVerdict),
}

impl SendOutcome {
    pub fn verdict(&self) -> &UploadVerdict {
        match self {
            Self::Verified(v) | Self::IntegrityFailed(v) => v,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// Reasons a send did not produce a verdict.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("a transfer is already in progress")]
    Busy,
    #[error(transparent)]
    Validation(#[from] SourceError),
    #[error("cannot digest payload: {0}")]
    Fatal(#[from] DigestError),
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] EnvelopeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("receiver returned {status}: {message}")]
    Server { status: u16, message: String },
}

/// Secure random source used to draw salts.
pub trait SaltSource: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SaltSource for T {}

/// Sends files as integrity-checked envelopes, one at a time.
pub struct FileSender {
    rng: Mutex<Box<dyn SaltSource>>,
    in_flight: AtomicBool,
    states: broadcast::Sender<SendState>,
}

impl Default for FileSender {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSender {
    /// Create a sender drawing salts from the operating system.
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }

    /// Create a sender drawing salts from `rng`.
    pub fn with_rng<R: SaltSource + 'static>(rng: R) -> Self {
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            rng: Mutex::new(Box::new(rng)),
            in_flight: AtomicBool::new(false),
            states,
        }
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SendState> {
        self.states.subscribe()
    }

    /// Whether a send is currently in progress.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Read the file at `path` and send it.
    pub async fn send_path<T: Transport>(
        &self,
        path: &Path,
        use_salt: bool,
        transport: &T,
    ) -> Result<SendOutcome, SendError> {
        let _guard = self.begin()?;
        self.emit(SendState::Preparing);

        let source = SourceFile::read(path).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "source file rejected");
            e
        })?;

        self.transmit(source.name, source.bytes, use_salt, transport)
            .await
    }

    /// Send in-memory bytes under `name`.
    pub async fn send_bytes<T: Transport>(
        &self,
        name: &str,
        payload: Vec<u8>,
        use_salt: bool,
        transport: &T,
    ) -> Result<SendOutcome, SendError> {
        let _guard = self.begin()?;
        self.emit(SendState::Preparing);

        if name.trim().is_empty() {
            return Err(SourceError::MissingName.into());
        }
        if payload.is_empty() {
            return Err(SourceError::EmptyPayload {
                name: name.to_string(),
            }
            .into());
        }

        self.transmit(name.to_string(), payload, use_salt, transport)
            .await
    }

    fn begin(&self) -> Result<InFlightGuard<'_>, SendError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SendError::Busy)?;
        Ok(InFlightGuard { sender: self })
    }

    fn emit(&self, state: SendState) {
        tracing::trace!(state = ?state, "send state");
        // No subscribers is fine.
        let _ = self.states.send(state);
    }

    async fn transmit<T: Transport>(
        &self,
        name: String,
        payload: Vec<u8>,
        use_salt: bool,
        transport: &T,
    ) -> Result<SendOutcome, SendError> {
        self.emit(SendState::Digesting);
        let envelope = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            TransferEnvelope::seal(name, payload, use_salt, &mut **rng)?
        };

        tracing::info!(
            file_name = %envelope.name,
            file_size = envelope.declared_size,
            digest = %envelope.digest,
            salted = use_salt,
            endpoint = %transport.endpoint(),
            "sending file"
        );

        self.emit(SendState::Sending);
        let body = encode_envelope(&envelope).map_err(SendError::Encode)?;

        self.emit(SendState::AwaitingResponse);
        let response = match transport.exchange(body).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "transfer failed in transport");
                self.emit(SendState::TransportError);
                return Err(e.into());
            }
        };

        if !response.is_success() {
            let message = String::from_utf8_lossy(&response.body).trim().to_string();
            tracing::warn!(status = response.status, message = %message, "receiver rejected upload");
            self.emit(SendState::ServerError);
            return Err(SendError::Server {
                status: response.status,
                message,
            });
        }

        let verdict = match decode_verdict(&response.body) {
            Ok(v) => v,
            Err(e) => {
                self.emit(SendState::TransportError);
                return Err(TransportError::MalformedResponse {
                    endpoint: transport.endpoint(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if !verdict.success {
            tracing::warn!(message = %verdict.message, "receiver did not process upload");
            self.emit(SendState::ServerError);
            return Err(SendError::Server {
                status: response.status,
                message: verdict.message,
            });
        }

        if verdict.integrity_valid {
            tracing::info!(file_name = %verdict.name, "upload verified by receiver");
            self.emit(SendState::Verified);
            Ok(SendOutcome::Verified(verdict))
        } else {
            tracing::warn!(
                file_name = %verdict.name,
                sent_digest = %envelope.digest,
                computed_digest = ?verdict.computed_digest,
                "receiver reported integrity failure"
            );
            self.emit(SendState::IntegrityFailed);
            Ok(SendOutcome::IntegrityFailed(verdict))
        }
    }
}

/// Clears the in-flight flag and returns the sender to `Idle` however the
/// send ends.
struct InFlightGuard<'a> {
    sender: &'a FileSender,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.sender.in_flight.store(false, Ordering::Release);
        self.sender.emit(SendState::Idle);
    }
}

/// Reasons an upload could not be turned into a verdict.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] EnvelopeError),
    #[error("invalid envelope: {0}")]
    Invalid(#[source] EnvelopeError),
    #[error("failed to store {name:?}: {cause:#}")]
    Storage { name: String, cause: anyhow::Error },
    #[error("failed to encode verdict: {0}")]
    Encode(#[source] EnvelopeError),
}

impl ReceiveError {
    /// HTTP-style status code reported to the sender.
    pub fn status(&self) -> u16 {
        match self {
            Self::Malformed(_) | Self::Invalid(_) => 400,
            Self::Storage { .. } | Self::Encode(_) => 500,
        }
    }
}

/// Verifies incoming envelopes and stores their payloads.
pub struct FileReceiver<S> {
    sink: S,
    engine: DigestEngine,
}

impl<S: PayloadSink> FileReceiver<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            engine: DigestEngine::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Process one serialized envelope into a verdict.
    ///
    /// 1. Decodes the envelope; malformed input is a protocol error.
    /// 2. Rejects an empty payload or a missing name.
    /// 3. Recomputes the digest, salted iff salt bytes are present.
    /// 4. Stores the payload; a storage failure yields no verdict.
    pub fn receive(&self, body: &[u8]) -> Result<UploadVerdict, ReceiveError> {
        let envelope = decode_envelope(body).map_err(|e| {
            tracing::warn!(error = %e, body_len = body.len(), "rejected malformed envelope");
            ReceiveError::Malformed(e)
        })?;

        envelope.validate().map_err(|e| {
            tracing::warn!(file_name = %envelope.name, error = %e, "rejected invalid envelope");
            ReceiveError::Invalid(e)
        })?;

        let mode = envelope.salting_mode();
        if envelope.has_conflicting_salt_flag() {
            tracing::warn!(
                file_name = %envelope.name,
                use_salt = ?envelope.use_salt,
                salt_len = envelope.salt.len(),
                "UseSalt flag disagrees with salt bytes, ignoring flag"
            );
        }
        if envelope.declared_size != envelope.payload.len() as u64 {
            tracing::warn!(
                file_name = %envelope.name,
                declared_size = envelope.declared_size,
                actual_size = envelope.payload.len(),
                "declared size differs from payload length"
            );
        }

        let computed = self
            .engine
            .recompute(&envelope.payload, envelope.salt.as_bytes());
        let integrity_valid = computed == envelope.digest;
        if !integrity_valid {
            if let Err(e) = ContentDigest::parse(envelope.digest.as_str()) {
                tracing::warn!(file_name = %envelope.name, error = %e, "received digest is malformed");
            }
        }

        let stored_path = self
            .sink
            .persist(&envelope.name, &envelope.payload)
            .map_err(|cause| {
                tracing::error!(file_name = %envelope.name, error = %cause, "failed to store payload");
                ReceiveError::Storage {
                    name: envelope.name.clone(),
                    cause,
                }
            })?;

        let verdict = UploadVerdict::for_envelope(&envelope, computed, integrity_valid);

        if let Err(e) = self.sink.record(&envelope, &verdict, &stored_path) {
            tracing::warn!(file_name = %envelope.name, error = %e, "failed to record receipt");
        }

        tracing::info!(
            file_name = %envelope.name,
            file_size = envelope.declared_size,
            salted = mode == SaltingMode::Salted,
            integrity_valid,
            path = %stored_path.display(),
            "file received"
        );

        Ok(verdict)
    }

    /// Process one request body into a response. Never fails: errors become
    /// non-success responses carrying the error message.
    pub fn handle(&self, body: &[u8]) -> RawResponse {
        let result = self
            .receive(body)
            .and_then(|verdict| encode_verdict(&verdict).map_err(ReceiveError::Encode));
        match result {
            Ok(body) => RawResponse { status: 200, body },
            Err(e) => RawResponse {
                status: e.status(),
                body: e.to_string().into_bytes(),
            },
        }
    }
}
