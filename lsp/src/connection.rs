//! Connection facade — lifecycle plus one typed operation per protocol method.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lens_types::{Position, Range};
use tokio::sync::Mutex;

use crate::error::ConnectionError;
use crate::protocol;
use crate::session::{Session, SessionShared};
use crate::types::{ConnectionState, ServerLaunch};

enum State {
    Unstarted,
    Starting,
    Ready(Session),
    Stopped,
}

/// Owns at most one language server subprocess for one project root.
///
/// `Stopped` is terminal: after [`Connection::stop`] or a failed start, a new
/// `Connection` must be constructed. The router does exactly that.
///
/// Operations take `&self`; several requests may be in flight on the same
/// connection, each correlated by its own identifier.
pub struct Connection {
    root: PathBuf,
    launch: ServerLaunch,
    /// Serializes the spawn → handshake sequence. A `start()` arriving while
    /// another is in flight waits here and then observes the outcome instead
    /// of spawning a second subprocess.
    start_latch: Mutex<()>,
    state: Mutex<State>,
}

impl Connection {
    #[must_use]
    pub fn new(root: PathBuf, launch: ServerLaunch) -> Self {
        Self {
            root,
            launch,
            start_latch: Mutex::new(()),
            state: Mutex::new(State::Unstarted),
        }
    }

    /// Current lifecycle state. A `Ready` session whose transport has died
    /// underneath reports `Stopped`.
    pub async fn state(&self) -> ConnectionState {
        match &*self.state.lock().await {
            State::Unstarted => ConnectionState::Unstarted,
            State::Starting => ConnectionState::Starting,
            State::Ready(session) if session.is_alive() => ConnectionState::Ready,
            State::Ready(_) | State::Stopped => ConnectionState::Stopped,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state().await.is_running()
    }

    /// Start the server and perform the handshake.
    ///
    /// Idempotent: if the session is already live, the cached handshake result
    /// is returned without re-spawning.
    pub async fn start(&self) -> Result<serde_json::Value, ConnectionError> {
        let _flight = self.start_latch.lock().await;

        {
            let mut state = self.state.lock().await;
            match &*state {
                State::Ready(session) if session.is_alive() => {
                    return Ok(session.handshake().clone());
                }
                // A Ready session whose transport died is as terminal as an
                // explicit stop; no respawn on this instance.
                State::Ready(_) | State::Stopped => {
                    *state = State::Stopped;
                    return Err(ConnectionError::Transport(
                        "connection is stopped; construct a new one".to_string(),
                    ));
                }
                State::Unstarted | State::Starting => {}
            }
        }

        *self.state.lock().await = State::Starting;
        tracing::info!(command = %self.launch.command, root = %self.root.display(), "starting language server");

        let started = async {
            let mut session = Session::spawn(&self.launch, &self.root).await?;
            session.initialize(&self.root).await?;
            Ok::<Session, ConnectionError>(session)
        }
        .await;

        match started {
            Ok(session) => {
                let handshake = session.handshake().clone();
                *self.state.lock().await = State::Ready(session);
                tracing::info!(command = %self.launch.command, "language server ready");
                Ok(handshake)
            }
            Err(e) => {
                *self.state.lock().await = State::Stopped;
                tracing::warn!(command = %self.launch.command, error = %e, "language server failed to start");
                Err(e)
            }
        }
    }

    /// Tear the session down. Idempotent and safe from any state.
    pub async fn stop(&self) {
        let _flight = self.start_latch.lock().await;
        let prior = std::mem::replace(&mut *self.state.lock().await, State::Stopped);
        if let State::Ready(session) = prior {
            tracing::info!(command = %self.launch.command, "stopping language server");
            session.dispose().await;
        }
    }

    /// Precondition check for every request operation: a live session.
    async fn live(&self) -> Result<Arc<SessionShared>, ConnectionError> {
        match &*self.state.lock().await {
            State::Ready(session) if session.is_alive() => Ok(session.shared()),
            _ => Err(ConnectionError::NotRunning),
        }
    }

    fn uri_for(&self, path: &Path) -> Result<String, ConnectionError> {
        protocol::path_to_file_uri(path)
            .map(String::from)
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn position_request(
        &self,
        method: &'static str,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(method, Some(protocol::position_params(&uri, position)))
            .await
    }

    pub async fn references(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(
                "textDocument/references",
                Some(protocol::references_params(&uri, position)),
            )
            .await
    }

    pub async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.position_request("textDocument/definition", path, position)
            .await
    }

    pub async fn hover(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.position_request("textDocument/hover", path, position)
            .await
    }

    pub async fn implementation(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.position_request("textDocument/implementation", path, position)
            .await
    }

    pub async fn prepare_rename(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.position_request("textDocument/prepareRename", path, position)
            .await
    }

    pub async fn rename(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(
                "textDocument/rename",
                Some(protocol::rename_params(&uri, position, new_name)),
            )
            .await
    }

    pub async fn document_symbols(
        &self,
        path: &Path,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(
                "textDocument/documentSymbol",
                Some(protocol::document_params(&uri)),
            )
            .await
    }

    /// Pull diagnostics for one document.
    ///
    /// Best effort: a server that does not implement the pull method yields an
    /// empty list rather than an error. Every other failure propagates.
    pub async fn diagnostics(&self, path: &Path) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        let outcome = shared
            .request(
                "textDocument/diagnostic",
                Some(protocol::document_params(&uri)),
            )
            .await;
        match outcome {
            Err(ConnectionError::Unsupported { method }) => {
                tracing::debug!(%method, "server lacks pull diagnostics, returning empty");
                Ok(serde_json::Value::Array(Vec::new()))
            }
            other => other,
        }
    }

    pub async fn workspace_symbols(
        &self,
        query: &str,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        shared
            .request(
                "workspace/symbol",
                Some(protocol::workspace_symbol_params(query)),
            )
            .await
    }

    pub async fn code_actions(
        &self,
        path: &Path,
        range: Range,
        context: &serde_json::Value,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(
                "textDocument/codeAction",
                Some(protocol::code_action_params(&uri, range, context)),
            )
            .await
    }

    pub async fn prepare_call_hierarchy(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.position_request("textDocument/prepareCallHierarchy", path, position)
            .await
    }

    /// The item is forwarded untouched; it is the server's own token.
    pub async fn incoming_calls(
        &self,
        item: &serde_json::Value,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        shared
            .request(
                "callHierarchy/incomingCalls",
                Some(protocol::call_hierarchy_params(item)),
            )
            .await
    }

    pub async fn outgoing_calls(
        &self,
        item: &serde_json::Value,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        shared
            .request(
                "callHierarchy/outgoingCalls",
                Some(protocol::call_hierarchy_params(item)),
            )
            .await
    }

    pub async fn formatting(
        &self,
        path: &Path,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value, ConnectionError> {
        let shared = self.live().await?;
        let uri = self.uri_for(path)?;
        shared
            .request(
                "textDocument/formatting",
                Some(protocol::formatting_params(&uri, options)),
            )
            .await
    }

    /// Wrap an already-initialized session, for tests that script the server
    /// over an in-memory transport.
    #[cfg(any(test, feature = "test-support"))]
    pub(crate) fn with_ready_session(root: PathBuf, launch: ServerLaunch, session: Session) -> Self {
        Self {
            root,
            launch,
            start_latch: Mutex::new(()),
            state: Mutex::new(State::Ready(session)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, scripted_session};

    fn test_root() -> PathBuf {
        #[cfg(windows)]
        return PathBuf::from(r"C:\repo");
        #[cfg(not(windows))]
        PathBuf::from("/repo")
    }

    fn test_file() -> PathBuf {
        test_root().join("src").join("main.rs")
    }

    fn bogus_launch() -> ServerLaunch {
        // Resolving this command would fail, which is the point: tests that
        // reach Ready without spawning prove no second spawn happens.
        ServerLaunch::new("/definitely/not/a/language-server", Vec::new())
    }

    async fn ready_connection<F>(handler: F) -> Connection
    where
        F: FnMut(&str, Option<serde_json::Value>) -> Scripted + Send + 'static,
    {
        let mut session = scripted_session(handler);
        session
            .initialize(&test_root())
            .await
            .expect("scripted handshake");
        Connection::with_ready_session(test_root(), bogus_launch(), session)
    }

    fn default_handshake(method: &str, _params: Option<serde_json::Value>) -> Scripted {
        match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            _ => Scripted::Result(serde_json::Value::Null),
        }
    }

    #[tokio::test]
    async fn test_new_connection_is_unstarted() {
        let connection = Connection::new(test_root(), bogus_launch());
        assert_eq!(connection.state().await, ConnectionState::Unstarted);
        assert!(!connection.is_running().await);
    }

    #[tokio::test]
    async fn test_operations_before_start_fail_not_running() {
        let connection = Connection::new(test_root(), bogus_launch());
        let position = Position::new(0, 0);

        let outcome = connection.references(&test_file(), position).await;
        assert!(matches!(outcome, Err(ConnectionError::NotRunning)));

        let outcome = connection.workspace_symbols("Foo").await;
        assert!(matches!(outcome, Err(ConnectionError::NotRunning)));

        let outcome = connection.diagnostics(&test_file()).await;
        assert!(matches!(outcome, Err(ConnectionError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_with_unresolvable_command_is_transport_error() {
        let connection = Connection::new(test_root(), bogus_launch());
        let outcome = connection.start().await;
        assert!(matches!(outcome, Err(ConnectionError::Transport(_))));
        assert_eq!(connection.state().await, ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_start_on_ready_returns_cached_handshake_without_respawn() {
        let connection = ready_connection(|method, _| match method {
            "initialize" => Scripted::Result(serde_json::json!({
                "capabilities": { "renameProvider": true },
                "serverInfo": { "name": "scripted" }
            })),
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        // The launch command is unresolvable, so success here means the
        // cached handshake was served and nothing was spawned.
        let first = connection.start().await.unwrap();
        let second = connection.start().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["serverInfo"]["name"], "scripted");
        assert_eq!(connection.state().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_from_any_state() {
        let connection = Connection::new(test_root(), bogus_launch());
        connection.stop().await;
        connection.stop().await;
        assert_eq!(connection.state().await, ConnectionState::Stopped);

        let ready = ready_connection(default_handshake).await;
        ready.stop().await;
        ready.stop().await;
        assert_eq!(ready.state().await, ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_requests_after_stop_fail_not_running() {
        let connection = ready_connection(default_handshake).await;
        connection.stop().await;

        let outcome = connection.hover(&test_file(), Position::new(1, 1)).await;
        assert!(matches!(outcome, Err(ConnectionError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_after_transport_loss_is_terminal() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let session = Session::connect(client_read, client_write, None);
        let connection = Connection::with_ready_session(test_root(), bogus_launch(), session);

        drop(server_io);
        // Wait for the reader task to notice the dead pipe.
        while connection.state().await != ConnectionState::Stopped {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        match connection.start().await {
            Err(ConnectionError::Transport(message)) => {
                assert!(message.contains("construct a new one"), "{message}");
            }
            other => panic!("expected the stopped refusal, got {other:?}"),
        }
        assert_eq!(connection.state().await, ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_flight() {
        // The command is unresolvable, so a start that reaches the spawn path
        // fails naming it. With the latch, only one caller gets that far; the
        // other observes the outcome and gets the stopped refusal instead.
        let connection = Connection::new(test_root(), bogus_launch());
        let (a, b) = tokio::join!(connection.start(), connection.start());

        let messages = [a.unwrap_err().to_string(), b.unwrap_err().to_string()];
        let spawn_attempts = messages
            .iter()
            .filter(|m| m.contains("not/a/language-server"))
            .count();
        let refusals = messages
            .iter()
            .filter(|m| m.contains("construct a new one"))
            .count();
        assert_eq!(spawn_attempts, 1, "{messages:?}");
        assert_eq!(refusals, 1, "{messages:?}");
    }

    #[tokio::test]
    async fn test_concurrent_starts_on_ready_share_the_cached_handshake() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let initializes = Arc::new(AtomicUsize::new(0));
        let counter = initializes.clone();
        let connection = ready_connection(move |method, _| match method {
            "initialize" => {
                counter.fetch_add(1, Ordering::SeqCst);
                Scripted::Result(serde_json::json!({ "capabilities": {} }))
            }
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let (a, b) = tokio::join!(connection.start(), connection.start());
        assert_eq!(a.unwrap(), b.unwrap());
        // Only the setup handshake; neither start() re-initialized.
        assert_eq!(initializes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_after_stop_is_terminal() {
        let connection = ready_connection(default_handshake).await;
        connection.stop().await;
        assert!(matches!(
            connection.start().await,
            Err(ConnectionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_diagnostics_degrade_to_empty_on_method_not_found() {
        let connection = ready_connection(|method, _| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "textDocument/diagnostic" => Scripted::Error(-32601, "Unhandled method"),
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let result = connection.diagnostics(&test_file()).await.unwrap();
        assert_eq!(result, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_hover_method_not_found_propagates() {
        let connection = ready_connection(|method, _| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "textDocument/hover" => Scripted::Error(-32601, "Unhandled method"),
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let outcome = connection.hover(&test_file(), Position::new(3, 7)).await;
        assert!(matches!(
            outcome,
            Err(ConnectionError::Unsupported {
                method: "textDocument/hover"
            })
        ));
    }

    #[tokio::test]
    async fn test_protocol_error_does_not_change_state() {
        let connection = ready_connection(|method, _| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "textDocument/rename" => Scripted::Error(-32803, "rename target is invalid"),
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let outcome = connection
            .rename(&test_file(), Position::new(0, 0), "better_name")
            .await;
        assert!(matches!(outcome, Err(ConnectionError::Protocol { .. })));
        assert_eq!(connection.state().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_call_hierarchy_item_round_trips_verbatim() {
        let connection = ready_connection(|method, params| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "callHierarchy/incomingCalls" | "callHierarchy/outgoingCalls" => {
                // Echo the params back so the test can inspect the wire shape.
                Scripted::Result(params.unwrap_or(serde_json::Value::Null))
            }
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let item = serde_json::json!({
            "name": "handle_request",
            "kind": 12,
            "uri": "file:///repo/src/main.rs",
            "range": { "start": { "line": 4, "character": 0 }, "end": { "line": 9, "character": 1 } },
            "selectionRange": { "start": { "line": 4, "character": 7 }, "end": { "line": 4, "character": 21 } },
            "data": { "token": "server-private-93" }
        });

        let incoming = connection.incoming_calls(&item).await.unwrap();
        assert_eq!(
            serde_json::to_string(&incoming["item"]).unwrap(),
            serde_json::to_string(&item).unwrap(),
        );

        let outgoing = connection.outgoing_calls(&item).await.unwrap();
        assert_eq!(outgoing["item"], item);
    }

    #[tokio::test]
    async fn test_definition_returns_location_with_ordered_range() {
        let connection = ready_connection(|method, _| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "textDocument/definition" => Scripted::Result(serde_json::json!([{
                "uri": "file:///repo/src/lib.rs",
                "range": {
                    "start": { "line": 12, "character": 4 },
                    "end": { "line": 12, "character": 16 }
                }
            }])),
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let result = connection
            .definition(&test_file(), Position::new(10, 4))
            .await
            .unwrap();

        let locations = result.as_array().unwrap();
        assert_eq!(locations.len(), 1);
        assert!(
            locations[0]["uri"]
                .as_str()
                .unwrap()
                .starts_with("file://")
        );
        let range: Range = serde_json::from_value(locations[0]["range"].clone()).unwrap();
        assert!(range.is_ordered());
    }

    #[tokio::test]
    async fn test_null_hover_is_a_legitimate_result() {
        let connection = ready_connection(default_handshake).await;
        let result = connection.hover(&test_file(), Position::new(0, 0)).await.unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_formatting_sends_options_through() {
        let connection = ready_connection(|method, params| match method {
            "initialize" => Scripted::Result(serde_json::json!({ "capabilities": {} })),
            "textDocument/formatting" => {
                let params = params.unwrap();
                assert_eq!(params["options"]["tabSize"], 4);
                Scripted::Result(serde_json::json!([]))
            }
            _ => Scripted::Result(serde_json::Value::Null),
        })
        .await;

        let options = serde_json::json!({ "tabSize": 4, "insertSpaces": true });
        let result = connection.formatting(&test_file(), &options).await.unwrap();
        assert_eq!(result, serde_json::json!([]));
    }
}
