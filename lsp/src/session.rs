//! One live protocol session: a spawned child plus its reader/writer tasks.
//!
//! The session owns the correlation map. Every outgoing request takes a fresh
//! identifier from an atomic counter and parks a oneshot sender in the map;
//! the reader task resolves it when the matching response arrives. When the
//! transport closes, the reader drains the map so no request hangs.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{MessageReader, MessageWriter};
use crate::error::{ConnectionError, METHOD_NOT_FOUND};
use crate::protocol::{self, Notification, Request};
use crate::types::ServerLaunch;

const REQUEST_TIMEOUT_SECS: u64 = 30;

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

const WRITER_CHANNEL_CAPACITY: usize = 64;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

fn classify(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_outcome = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_outcome) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method }),
        _ => None,
    }
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>;

/// State shared between callers, the reader task, and the writer task.
pub(crate) struct SessionShared {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl SessionShared {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Issue one request and await its correlated response.
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(ConnectionError::Transport(format!(
                    "serializing {method} request: {e}"
                )));
            }
        };

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            // Failed to enqueue: reclaim the pending entry rather than leak it.
            self.pending.lock().await.remove(&id);
            return Err(ConnectionError::Transport(
                "writer channel closed".to_string(),
            ));
        }

        let timeout = std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS);
        let body = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => body,
            // Sender dropped: the reader task drained the map on transport loss.
            Ok(Err(_)) => return Err(ConnectionError::ConnectionLost),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ConnectionError::Transport(format!(
                    "{method} request timed out after {REQUEST_TIMEOUT_SECS}s"
                )));
            }
        };

        if let Some(error) = body.get("error") {
            return Err(ConnectionError::from_response_error(method, error));
        }
        Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ConnectionError> {
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|e| {
            ConnectionError::Transport(format!("serializing {method} notification: {e}"))
        })?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| ConnectionError::Transport("writer channel closed".to_string()))
    }
}

pub(crate) struct Session {
    shared: Arc<SessionShared>,
    child: Option<Child>,
    handshake: serde_json::Value,
    #[allow(dead_code)]
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Spawn the server and bind a session to its standard streams.
    ///
    /// The working directory is the project root; stderr is discarded.
    pub async fn spawn(launch: &ServerLaunch, root: &Path) -> Result<Self, ConnectionError> {
        let resolved = which::which(&launch.command).map_err(|e| {
            ConnectionError::Transport(format!("{}: {e}", launch.command))
        })?;

        let mut child = Command::new(&resolved)
            .args(&launch.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectionError::Transport(format!("spawning {}: {e}", launch.command)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectionError::Transport("no stdout from child".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectionError::Transport("no stdin from child".to_string()))?;

        Ok(Self::connect(stdout, stdin, Some(child)))
    }

    /// Bind a session to an arbitrary duplex transport.
    ///
    /// Production code goes through [`Session::spawn`]; tests drive this with
    /// in-memory streams.
    pub fn connect<R, W>(read_half: R, write_half: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            writer_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        });

        let writer_handle = tokio::spawn(async move {
            let mut writer = MessageWriter::new(write_half);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_message(&frame).await {
                            tracing::warn!("write error on server stdin: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = MessageReader::new(read_half);
            loop {
                match reader.next_message().await {
                    Ok(Some(frame)) => Self::dispatch_frame(&frame, &reader_shared).await,
                    Ok(None) => {
                        tracing::info!("language server closed its output stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("read error on server stdout: {e}");
                        break;
                    }
                }
            }
            // Transport is gone: fail every outstanding request instead of
            // leaving callers parked forever.
            reader_shared.alive.store(false, Ordering::Release);
            let drained = std::mem::take(&mut *reader_shared.pending.lock().await);
            if !drained.is_empty() {
                tracing::debug!(count = drained.len(), "failing outstanding requests");
            }
            drop(drained);
        });

        Self {
            shared,
            child,
            handshake: serde_json::Value::Null,
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(frame: &serde_json::Value, shared: &SessionShared) {
        let Some(incoming) = classify(frame) else {
            tracing::trace!("ignoring malformed frame from server");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let sender = shared.pending.lock().await.remove(&id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    // Late response for a timed-out or cancelled request.
                    None => tracing::trace!(id, "discarding response with no pending request"),
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Servers block on client/registerCapability and friends if
                // nobody answers, so decline every server-initiated request.
                tracing::debug!(%method, "declining server-initiated request");
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": METHOD_NOT_FOUND,
                        "message": format!("Method not found: {method}")
                    }
                });
                let _ = shared.writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method } => {
                // Pull-only diagnostics model: pushed notifications carry
                // nothing this layer consumes.
                tracing::trace!(%method, "ignoring server notification");
            }
        }
    }

    /// Perform the `initialize` / `initialized` handshake and cache the result.
    pub async fn initialize(&mut self, root: &Path) -> Result<serde_json::Value, ConnectionError> {
        let root_uri = protocol::path_to_file_uri(root)
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let result = self
            .shared
            .request("initialize", Some(protocol::initialize_params(root_uri.as_str())))
            .await?;

        self.shared
            .notify("initialized", Some(serde_json::json!({})))
            .await?;

        self.handshake = result.clone();
        Ok(result)
    }

    pub fn handshake(&self) -> &serde_json::Value {
        &self.handshake
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Gracefully tear the session down. Consumes self.
    ///
    /// Best effort: the polite shutdown/exit exchange gets a short window,
    /// then the child is killed outright.
    pub async fn dispose(mut self) {
        let grace = std::time::Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);

        if self.shared.is_alive() {
            if let Ok(Ok(_)) =
                tokio::time::timeout(grace, self.shared.request("shutdown", None)).await
            {
                let _ = self.shared.notify("exit", None).await;
            }
        }

        let _ = self.shared.writer_tx.send(WriterCommand::Shutdown).await;

        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                tracing::debug!("language server ignored shutdown, killing");
                let _ = child.kill().await;
            }
        }
    }
}
