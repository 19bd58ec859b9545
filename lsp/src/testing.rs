//! Scripted in-memory server for tests.
//!
//! Available to downstream crates through the `test-support` feature so
//! router tests can drive a [`Connection`] without spawning a process.

use std::path::PathBuf;

use crate::codec::{MessageReader, MessageWriter};
use crate::connection::Connection;
use crate::session::Session;
use crate::types::ServerLaunch;

/// What the scripted server does with one incoming request.
///
/// `Ignore` withholds the reply entirely, leaving the request in flight for
/// tests that exercise timing against an outstanding operation.
pub enum Scripted {
    Result(serde_json::Value),
    Error(i64, &'static str),
    Ignore,
}

/// Connect a session to a scripted server over an in-memory pipe.
///
/// The handler sees every incoming method with its params; notifications get
/// a handler call too but no reply is written for them.
pub(crate) fn scripted_session<F>(handler: F) -> Session
where
    F: FnMut(&str, Option<serde_json::Value>) -> Scripted + Send + 'static,
{
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let session = Session::connect(client_read, client_write, None);
    tokio::spawn(run_scripted_server(server_io, handler));
    session
}

/// A `Ready` connection backed by a scripted server, handshake already done.
pub async fn scripted_connection<F>(root: PathBuf, handler: F) -> Connection
where
    F: FnMut(&str, Option<serde_json::Value>) -> Scripted + Send + 'static,
{
    let mut session = scripted_session(handler);
    session
        .initialize(&root)
        .await
        .expect("scripted server must answer the handshake");
    Connection::with_ready_session(root, ServerLaunch::new("scripted-server", Vec::new()), session)
}

async fn run_scripted_server<F>(io: tokio::io::DuplexStream, mut handler: F)
where
    F: FnMut(&str, Option<serde_json::Value>) -> Scripted + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut reader = MessageReader::new(read_half);
    let mut writer = MessageWriter::new(write_half);

    while let Ok(Some(frame)) = reader.next_message().await {
        let Some(method) = frame.get("method").and_then(|m| m.as_str()) else {
            continue;
        };
        let outcome = handler(method, frame.get("params").cloned());
        let Some(id) = frame.get("id").cloned() else {
            continue;
        };
        let reply = match outcome {
            Scripted::Result(result) => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": result,
            }),
            Scripted::Error(code, message) => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
            Scripted::Ignore => continue,
        };
        if writer.write_message(&reply).await.is_err() {
            break;
        }
    }
}
