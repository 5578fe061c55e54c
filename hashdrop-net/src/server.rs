//! Upload server: accepts `POST /upload` and answers with the receiver's verdict.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hashdrop_files::transfer::{FileReceiver, PayloadSink, RawResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::http::{read_message, render_response, HttpError, Message};

/// Path the upload endpoint is served on.
pub const UPLOAD_PATH: &str = "/upload";

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Largest accepted request body. Envelopes are base64, so this is about
    /// 4/3 of the largest file that can be uploaded.
    pub max_body_bytes: usize,
    /// How long a client may take to deliver its whole request.
    pub request_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 256 * 1024 * 1024,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// HTTP front end for a [`FileReceiver`].
pub struct UploadServer<S> {
    listener: TcpListener,
    receiver: Arc<FileReceiver<S>>,
    limits: ServerLimits,
}

impl<S: PayloadSink + 'static> UploadServer<S> {
    /// Bind the listening socket. Use port 0 to let the OS pick one.
    pub async fn bind(
        addr: SocketAddr,
        receiver: Arc<FileReceiver<S>>,
        limits: ServerLimits,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind upload server on {addr}"))?;
        Ok(Self {
            listener,
            receiver,
            limits,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    /// Serve connections until `shutdown` resolves, then wait for in-flight
    /// connections to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr()?;
        tracing::info!(addr = %local_addr, path = UPLOAD_PATH, "upload server listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let receiver = Arc::clone(&self.receiver);
                    let limits = self.limits;
                    connections.spawn(serve_connection(socket, peer, receiver, limits));
                }
                // Reap finished connections so the set doesn't grow unbounded.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!(
            in_flight = connections.len(),
            "upload server shutting down"
        );
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

async fn serve_connection<S: PayloadSink + 'static>(
    mut socket: TcpStream,
    peer: SocketAddr,
    receiver: Arc<FileReceiver<S>>,
    limits: ServerLimits,
) {
    let read = tokio::time::timeout(
        limits.request_timeout,
        read_message(&mut socket, limits.max_body_bytes),
    )
    .await;

    let response = match read {
        Err(_) => {
            tracing::warn!(peer = %peer, "request timed out");
            text_response(408, "request timed out")
        }
        Ok(Err(HttpError::Io(e))) => {
            tracing::debug!(peer = %peer, error = %e, "connection dropped while reading");
            return;
        }
        Ok(Err(e @ (HttpError::BodyTooLarge { .. } | HttpError::HeadersTooLarge))) => {
            tracing::warn!(peer = %peer, error = %e, "request too large");
            text_response(413, &e.to_string())
        }
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "unparsable request");
            text_response(400, &e.to_string())
        }
        Ok(Ok(request)) => route(request, peer, receiver).await,
    };

    if let Err(e) = socket.write_all(&response).await {
        tracing::warn!(peer = %peer, error = %e, "failed to send response");
        return;
    }
    if let Err(e) = socket.shutdown().await {
        tracing::trace!(peer = %peer, error = %e, "socket shutdown error");
    }

    // Closing with unread input resets the connection, which can discard the
    // response before the client reads it (e.g. after a 413). A slow client
    // gets as long to finish sending as it had to send the request.
    let mut discard = [0u8; 8 * 1024];
    let _ = tokio::time::timeout(limits.request_timeout, async {
        while let Ok(n) = socket.read(&mut discard).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

async fn route<S: PayloadSink + 'static>(
    request: Message,
    peer: SocketAddr,
    receiver: Arc<FileReceiver<S>>,
) -> Vec<u8> {
    let (method, path) = match request.request_target() {
        Ok(target) => target,
        Err(e) => return text_response(400, &e.to_string()),
    };
    let path = path.split('?').next().unwrap_or(path);

    if method != "POST" || path != UPLOAD_PATH {
        tracing::debug!(peer = %peer, method, path, "no route");
        return text_response(404, "not found");
    }

    tracing::debug!(peer = %peer, body_len = request.body.len(), "upload request");

    // Digesting and writing to disk are blocking work.
    let body = request.body;
    let handled = tokio::task::spawn_blocking(move || receiver.handle(&body)).await;

    match handled {
        Ok(RawResponse { status, body }) => {
            let content_type = if status == 200 {
                "application/json"
            } else {
                "text/plain; charset=utf-8"
            };
            render_response(status, content_type, &body)
        }
        Err(e) => {
            tracing::error!(peer = %peer, error = %e, "upload handler panicked");
            text_response(500, "upload handler failed")
        }
    }
}

fn text_response(status: u16, message: &str) -> Vec<u8> {
    render_response(status, "text/plain; charset=utf-8", message.as_bytes())
}
