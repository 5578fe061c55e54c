//! HTTP transport for hashdrop: the upload server and the client transport.

pub mod client;
pub mod http;
pub mod server;

pub use client::{HttpTransport, DEFAULT_TIMEOUT};
pub use server::{ServerLimits, UploadServer, UPLOAD_PATH};
