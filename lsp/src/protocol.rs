//! JSON-RPC message types and per-method parameter builders.
//!
//! The connection manager builds every outgoing parameter object here so the
//! session layer only ever sees `(method, params)` pairs.

use std::path::{Path, PathBuf};

use lens_types::{Position, Range};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[error("cannot express path as a file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

/// Handshake parameters: our process id, the project root as a file URI, and
/// a default (empty) capability set. The server decides what it offers.
pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {},
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

fn text_document(uri: &str) -> serde_json::Value {
    serde_json::json!({ "uri": uri })
}

/// The `{ textDocument, position }` pair shared by most position queries.
pub(crate) fn position_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": text_document(uri),
        "position": position,
    })
}

pub(crate) fn references_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": text_document(uri),
        "position": position,
        "context": { "includeDeclaration": true },
    })
}

pub(crate) fn rename_params(uri: &str, position: Position, new_name: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": text_document(uri),
        "position": position,
        "newName": new_name,
    })
}

pub(crate) fn document_params(uri: &str) -> serde_json::Value {
    serde_json::json!({ "textDocument": text_document(uri) })
}

pub(crate) fn workspace_symbol_params(query: &str) -> serde_json::Value {
    serde_json::json!({ "query": query })
}

pub(crate) fn code_action_params(
    uri: &str,
    range: Range,
    context: &serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": text_document(uri),
        "range": range,
        "context": context,
    })
}

/// Incoming/outgoing call params wrap the item verbatim. The item is an
/// opaque token minted by the server; altering it would break the follow-up.
pub(crate) fn call_hierarchy_params(item: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "item": item })
}

pub(crate) fn formatting_params(uri: &str, options: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "textDocument": text_document(uri),
        "options": options,
    })
}
