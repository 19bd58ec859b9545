//! Action router: validate, connect lazily, dispatch, envelope.
//!
//! Nothing escapes [`Router::dispatch`] as an error. Validation failures,
//! startup failures, and protocol errors all come back as a failure envelope
//! carrying the action name; the caller sees exactly one shape either way.

use std::path::PathBuf;
use std::sync::Arc;

use lens_lsp::{Connection, ConnectionError, ServerLaunch};
use lens_types::ResultEnvelope;
use tokio::sync::{Mutex, oneshot};

use crate::catalog::{Action, ActionRequest, Invocation, ValidationError};

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Connection(#[from] ConnectionError),
}

/// Routes action requests onto one language server connection per project root.
///
/// The connection is created lazily on first use and replaced whenever the
/// held one is no longer running. `Stopped` connections are never revived.
pub struct Router {
    root: PathBuf,
    launch: ServerLaunch,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl Router {
    #[must_use]
    pub fn new(root: PathBuf, launch: ServerLaunch) -> Self {
        Self {
            root,
            launch,
            connection: Mutex::new(None),
        }
    }

    /// Dispatch one action request and produce the uniform envelope.
    pub async fn dispatch(&self, request: &ActionRequest) -> ResultEnvelope {
        match self.run(request).await {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(content) => ResultEnvelope::raw(content),
                Err(e) => ResultEnvelope::failure(request.action.name(), &e.to_string()),
            },
            Err(e) => {
                tracing::debug!(action = request.action.name(), error = %e, "action failed");
                ResultEnvelope::failure(request.action.name(), &e.to_string())
            }
        }
    }

    /// Like [`Router::dispatch`], honoring a per-request cancellation signal.
    ///
    /// A signal that fired before dispatch skips the connection entirely. A
    /// signal during flight resolves the envelope immediately; the abandoned
    /// protocol request is failed by the session's own teardown path later.
    /// A dropped (never-fired) sender is not a cancellation.
    pub async fn dispatch_cancellable(
        &self,
        request: &ActionRequest,
        mut cancel: oneshot::Receiver<()>,
    ) -> ResultEnvelope {
        match cancel.try_recv() {
            Ok(()) => {
                return ResultEnvelope::failure(request.action.name(), "cancelled before dispatch");
            }
            Err(oneshot::error::TryRecvError::Empty | oneshot::error::TryRecvError::Closed) => {}
        }

        tokio::select! {
            envelope = self.dispatch(request) => envelope,
            () = fired(&mut cancel) => {
                ResultEnvelope::failure(request.action.name(), "cancelled")
            }
        }
    }

    async fn run(&self, request: &ActionRequest) -> Result<serde_json::Value, DispatchError> {
        // Validation never touches the connection.
        let invocation = request.validate()?;
        let connection = self.connection().await?;

        let result = match invocation {
            Invocation::Position { file_path, position } => match request.action {
                Action::FindReferences => connection.references(&file_path, position).await?,
                Action::GoToDefinition => connection.definition(&file_path, position).await?,
                Action::GetHover => connection.hover(&file_path, position).await?,
                Action::PrepareRename => connection.prepare_rename(&file_path, position).await?,
                Action::PrepareCallHierarchy => {
                    connection.prepare_call_hierarchy(&file_path, position).await?
                }
                Action::GoToImplementation => {
                    connection.implementation(&file_path, position).await?
                }
                // The catalog derives the shape from the action; any other
                // pairing is an internal inconsistency.
                other => unreachable!("{} does not take position parameters", other.name()),
            },
            Invocation::Rename {
                file_path,
                position,
                new_name,
            } => connection.rename(&file_path, position, &new_name).await?,
            Invocation::Document { file_path } => match request.action {
                Action::GetDiagnostics => connection.diagnostics(&file_path).await?,
                Action::GetDocumentSymbols => connection.document_symbols(&file_path).await?,
                other => unreachable!("{} does not take document parameters", other.name()),
            },
            Invocation::Format { file_path, options } => {
                connection.formatting(&file_path, &options).await?
            }
            Invocation::Query { query } => connection.workspace_symbols(&query).await?,
            Invocation::RangeContext {
                file_path,
                range,
                context,
            } => connection.code_actions(&file_path, range, &context).await?,
            Invocation::Item { item } => match request.action {
                Action::GetIncomingCalls => connection.incoming_calls(&item).await?,
                Action::GetOutgoingCalls => connection.outgoing_calls(&item).await?,
                other => unreachable!("{} does not take a call-hierarchy item", other.name()),
            },
        };

        Ok(result)
    }

    /// The connection for this project root, started lazily.
    ///
    /// Holding the lock across `start()` keeps concurrent dispatches from
    /// racing to spawn; they observe the one in-flight startup instead.
    async fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        let mut held = self.connection.lock().await;

        if let Some(existing) = held.as_ref()
            && existing.is_running().await
        {
            return Ok(existing.clone());
        }

        let fresh = Arc::new(Connection::new(self.root.clone(), self.launch.clone()));
        fresh.start().await?;
        *held = Some(fresh.clone());
        Ok(fresh)
    }

    /// Stop and drop the held connection, if any.
    pub async fn shutdown(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.stop().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn has_connection(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn install_connection(&self, connection: Arc<Connection>) {
        *self.connection.lock().await = Some(connection);
    }
}

/// Resolves only when the signal genuinely fired; a dropped sender pends
/// forever so `select!` falls through to the dispatch arm.
async fn fired(cancel: &mut oneshot::Receiver<()>) {
    if cancel.await.is_err() {
        std::future::pending::<()>().await;
    }
}
