//! Minimal HTTP/1.1 framing: enough to carry one request and one response
//! per connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the header block of any message.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before headers were complete")]
    Incomplete,
    #[error("connection closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },
    #[error("header block exceeds {} bytes", MAX_HEADER_BYTES)]
    HeadersTooLarge,
    #[error("body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge { declared: usize, limit: usize },
    #[error("malformed start line: {0:?}")]
    BadStartLine(String),
    #[error("malformed Content-Length: {0:?}")]
    BadContentLength(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One framed message: the raw header block and the body.
#[derive(Debug, Clone)]
pub struct Message {
    pub head: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn start_line(&self) -> &str {
        self.head.lines().next().unwrap_or("").trim()
    }

    /// Method and path of a request.
    pub fn request_target(&self) -> Result<(&str, &str), HttpError> {
        let line = self.start_line();
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version)) if version.starts_with("HTTP/1.") => {
                Ok((method, path))
            }
            _ => Err(HttpError::BadStartLine(line.to_string())),
        }
    }

    /// Status code of a response.
    pub fn status(&self) -> Result<u16, HttpError> {
        let line = self.start_line();
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
                .parse::<u16>()
                .map_err(|_| HttpError::BadStartLine(line.to_string())),
            _ => Err(HttpError::BadStartLine(line.to_string())),
        }
    }
}

/// Find the end of the header block (position after `\r\n\r\n` or `\n\n`).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    if let Some(i) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(i + 4);
    }
    data.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}

/// First value of header `name`, compared case-insensitively.
fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Parse the `Content-Length` header. A missing header means an empty body.
pub fn parse_content_length(head: &str) -> Result<usize, HttpError> {
    match header_value(head, "content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::BadContentLength(value.to_string())),
        None => Ok(0),
    }
}

/// Read one message framed by `Content-Length`, refusing bodies over `max_body`.
///
/// The limit is checked against the declared length before the body is read.
pub async fn read_message<R>(reader: &mut R, max_body: usize) -> Result<Message, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(HttpError::HeadersTooLarge);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    if header_end > MAX_HEADER_BYTES {
        return Err(HttpError::HeadersTooLarge);
    }

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = parse_content_length(&head)?;
    if content_length > max_body {
        return Err(HttpError::BodyTooLarge {
            declared: content_length,
            limit: max_body,
        });
    }

    let mut body = buf.split_off(header_end);
    body.reserve(content_length.saturating_sub(body.len()));
    while body.len() < content_length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::TruncatedBody {
                expected: content_length,
                received: body.len(),
            });
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Message { head, body })
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Render a complete response with `Connection: close`.
pub fn render_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        content_type,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Render a `POST` request with a JSON body and `Connection: close`.
pub fn render_post(host: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "POST {path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}
