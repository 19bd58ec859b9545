//! Error taxonomy for the connection manager.

/// JSON-RPC "method not found" — the marker for optional methods the server
/// does not implement.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// Everything a connection operation can fail with.
///
/// `Transport` and `ConnectionLost` are fatal to the session; `Protocol` and
/// `Unsupported` describe a single request and leave the session usable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// An operation requiring a live session was invoked while none exists.
    #[error("language server session is not running")]
    NotRunning,

    /// The subprocess failed to spawn, or the stream failed irrecoverably.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The transport closed while this request was outstanding.
    #[error("connection to the language server was lost before a response arrived")]
    ConnectionLost,

    /// The server answered this request with an explicit error.
    #[error("server error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The server does not implement the requested method.
    #[error("server does not implement {method}")]
    Unsupported { method: &'static str },
}

impl ConnectionError {
    /// Map a JSON-RPC `error` member onto the taxonomy.
    pub(crate) fn from_response_error(method: &'static str, error: &serde_json::Value) -> Self {
        let code = error.get("code").and_then(serde_json::Value::as_i64).unwrap_or(0);
        if code == METHOD_NOT_FOUND {
            return Self::Unsupported { method };
        }
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Self::Protocol { code, message }
    }
}
