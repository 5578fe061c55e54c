//! Shared test utilities for hashdrop tests.
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]` within
//! hashdrop-files. Provides in-process transports so the sender and receiver
//! can be exercised without sockets.

use std::sync::Arc;
use std::time::Duration;

use hashdrop_protocol::{decode_envelope, encode_envelope, TransferEnvelope};

use crate::transfer::{FileReceiver, PayloadSink, RawResponse, Transport, TransportError};

/// Initialise a tracing subscriber for tests.
///
/// Respects the `RUST_LOG` environment variable, defaults to `debug`.
/// Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

type Tamper = Box<dyn Fn(&mut TransferEnvelope) + Send + Sync>;

/// Hands request bodies straight to a [`FileReceiver`].
///
/// An optional tamper hook rewrites the envelope in flight, standing in for
/// corruption or a man-in-the-middle between sender and receiver.
pub struct LoopbackTransport<S> {
    receiver: Arc<FileReceiver<S>>,
    tamper: Option<Tamper>,
}

impl<S: PayloadSink> LoopbackTransport<S> {
    pub fn new(receiver: Arc<FileReceiver<S>>) -> Self {
        Self {
            receiver,
            tamper: None,
        }
    }

    pub fn with_tamper(mut self, f: impl Fn(&mut TransferEnvelope) + Send + Sync + 'static) -> Self {
        self.tamper = Some(Box::new(f));
        self
    }

    pub fn receiver(&self) -> &FileReceiver<S> {
        &self.receiver
    }
}

impl<S: PayloadSink> Transport for LoopbackTransport<S> {
    fn endpoint(&self) -> String {
        "loopback".to_string()
    }

    async fn exchange(&self, body: Vec<u8>) -> Result<RawResponse, TransportError> {
        let body = match &self.tamper {
            Some(tamper) => {
                let mut envelope =
                    decode_envelope(&body).map_err(|e| TransportError::MalformedResponse {
                        endpoint: self.endpoint(),
                        reason: format!("tamper hook could not decode request: {e}"),
                    })?;
                tamper(&mut envelope);
                encode_envelope(&envelope).map_err(|e| TransportError::MalformedResponse {
                    endpoint: self.endpoint(),
                    reason: format!("tamper hook could not encode request: {e}"),
                })?
            }
            None => body,
        };
        Ok(self.receiver.handle(&body))
    }
}

/// Always fails to connect.
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn endpoint(&self) -> String {
        "unreachable".to_string()
    }

    async fn exchange(&self, _body: Vec<u8>) -> Result<RawResponse, TransportError> {
        Err(TransportError::Connect {
            endpoint: self.endpoint(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
        })
    }
}

/// Answers every request with a fixed response, optionally after a delay.
pub struct StaticTransport {
    response: RawResponse,
    delay: Option<Duration>,
}

impl StaticTransport {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            response: RawResponse { status, body },
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Transport for StaticTransport {
    fn endpoint(&self) -> String {
        "static".to_string()
    }

    async fn exchange(&self, _body: Vec<u8>) -> Result<RawResponse, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }
}
