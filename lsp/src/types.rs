//! Public configuration and state types for the connection manager.

use serde::Deserialize;

/// How to launch the language server for a project.
///
/// Server selection is a configuration input; the connection manager takes
/// the command as given and resolves it through `PATH` at spawn time.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerLaunch {
    /// Executable command (e.g. "rust-analyzer", "typescript-language-server").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ServerLaunch {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// Lifecycle state of a [`Connection`](crate::Connection).
///
/// `Stopped` is terminal; a fresh `Connection` is required afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unstarted,
    Starting,
    Ready,
    Stopped,
}

impl ConnectionState {
    /// Whether a transport is currently bound.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}
