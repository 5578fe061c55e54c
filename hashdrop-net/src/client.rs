//! HTTP transport for [`FileSender`](hashdrop_files::transfer::FileSender).

use std::time::Duration;

use hashdrop_files::transfer::{RawResponse, Transport, TransportError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::{read_message, render_post, HttpError};
use crate::server::UPLOAD_PATH;

/// Round-trip bound used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Largest response body the client will read.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Posts envelopes to an upload server, one connection per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    addr: String,
    timeout: Duration,
}

impl HttpTransport {
    /// `addr` is `host:port`. The whole round trip, from connect to the last
    /// response byte, is bounded by `timeout`.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    async fn round_trip(&self, body: Vec<u8>) -> Result<RawResponse, TransportError> {
        let mut stream =
            TcpStream::connect(&self.addr)
                .await
                .map_err(|source| TransportError::Connect {
                    endpoint: self.endpoint(),
                    source,
                })?;

        let request = render_post(&self.addr, UPLOAD_PATH, &body);
        let (mut reader, mut writer) = stream.split();
        let send = async {
            writer.write_all(&request).await?;
            tracing::debug!(endpoint = %self.endpoint(), request_len = request.len(), "request sent");
            Ok::<(), std::io::Error>(())
        };
        let receive = read_message(&mut reader, MAX_RESPONSE_BYTES);
        tokio::pin!(send, receive);

        // The server may answer before the body is fully written (413 on an
        // oversized upload), so the response is read while sending.
        let response = tokio::select! {
            response = &mut receive => response,
            sent = &mut send => match sent {
                Ok(()) => receive.await,
                Err(source) => match receive.await {
                    Ok(response) => Ok(response),
                    Err(_) => {
                        return Err(TransportError::Io {
                            endpoint: self.endpoint(),
                            source,
                        })
                    }
                },
            },
        };

        let response = response.map_err(|e| match e {
            HttpError::Io(source) => TransportError::Io {
                endpoint: self.endpoint(),
                source,
            },
            other => TransportError::MalformedResponse {
                endpoint: self.endpoint(),
                reason: other.to_string(),
            },
        })?;

        let status = response
            .status()
            .map_err(|e| TransportError::MalformedResponse {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })?;
        tracing::debug!(endpoint = %self.endpoint(), status, "response received");

        Ok(RawResponse {
            status,
            body: response.body,
        })
    }
}

impl Transport for HttpTransport {
    fn endpoint(&self) -> String {
        format!("http://{}{}", self.addr, UPLOAD_PATH)
    }

    async fn exchange(&self, body: Vec<u8>) -> Result<RawResponse, TransportError> {
        tokio::time::timeout(self.timeout, self.round_trip(body))
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: self.endpoint(),
                after: self.timeout,
            })?
    }
}
