//! Source reading, received-file storage, and the sender/receiver transfer
//! protocol.

pub mod source;
pub mod store;
pub mod transfer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
