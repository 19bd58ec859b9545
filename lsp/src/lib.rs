//! Connection manager for an external language server subprocess.
//!
//! [`Connection`] owns one spawned server, performs the `initialize`
//! handshake, and exposes one typed request operation per protocol method.
//! Responses are correlated to requests by identifier, so callers may keep
//! several operations in flight on the same connection.

pub mod codec;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub(crate) mod protocol;
pub(crate) mod session;

mod connection;
mod error;

pub use connection::Connection;
pub use error::ConnectionError;
pub use types::{ConnectionState, ServerLaunch};
