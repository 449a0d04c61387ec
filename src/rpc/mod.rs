//! Tool RPC server: newline-delimited JSON-RPC 2.0 over local TCP.
//!
//! Agents connect, call `initialize`, `tools/list`, and `tools/call`, and
//! receive server-initiated `pair_update` notifications on the same
//! connection. Logging stays on the tracing layer; the socket carries
//! protocol messages only.

pub mod collab;
pub mod tools;

use std::sync::Arc;

use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::application::WorkerManager;
use crate::services::{
    Coordinator, PairUpdate, SessionRegistry, TaskScheduler, PUSH_CHANNEL_CAPACITY,
};

/// Shared handles every tool handler works against.
pub struct RpcDeps {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub manager: Arc<WorkerManager>,
}

pub struct RpcServer {
    deps: Arc<RpcDeps>,
}

impl RpcServer {
    pub fn new(deps: RpcDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    /// Accept loop. Returns when the shutdown channel fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: broadcast::Sender<()>,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "RPC server listening");

        let mut accept_shutdown = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "Session connected");
                            let deps = self.deps.clone();
                            let session_shutdown = shutdown.subscribe();
                            tokio::spawn(async move {
                                if let Err(err) = run_session(stream, deps, session_shutdown).await {
                                    tracing::debug!(error = %err, "Session ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Accept failed");
                        }
                    }
                }
                _ = accept_shutdown.recv() => break,
            }
        }
        Ok(())
    }
}

/// One connection: read request lines, write responses and pushes. Writes
/// for a session are serialized by construction — this task is the only
/// writer.
async fn run_session(
    stream: TcpStream,
    deps: Arc<RpcDeps>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let session_id = Uuid::new_v4();
    let (push_tx, mut push_rx) = mpsc::channel::<PairUpdate>(PUSH_CHANNEL_CAPACITY);

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = handle_message(&deps, session_id, &push_tx, line).await;
                if !response.is_empty() {
                    write_half.write_all(response.as_bytes()).await?;
                    write_half.write_all(b"\n").await?;
                    write_half.flush().await?;
                }
            }
            update = push_rx.recv() => {
                let Some(update) = update else { break };
                let notification = serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "pair_update",
                    "params": update,
                });
                write_half.write_all(notification.to_string().as_bytes()).await?;
                write_half.write_all(b"\n").await?;
                write_half.flush().await?;
            }
            _ = shutdown.recv() => break,
        }
    }

    deps.registry.remove(session_id);
    Ok(())
}

async fn handle_message(
    deps: &Arc<RpcDeps>,
    session_id: Uuid,
    push_tx: &mpsc::Sender<PairUpdate>,
    line: &str,
) -> String {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                serde_json::Value::Null,
                -32700,
                &format!("Parse error: {e}"),
            );
        }
    };

    let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = request
        .get("params")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    match method {
        "initialize" => handle_initialize(id),
        "tools/list" => success_response(id, tools::tool_listing()),
        "tools/call" => {
            // Tool handlers must not take the server down: panics are
            // recovered into a generic internal error.
            let fut = tools::handle_tools_call(deps, session_id, push_tx, params);
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(result)) => success_response(id, result),
                Ok(Err(err)) => error_response(id, err.rpc_code(), &err.to_string()),
                Err(_) => {
                    tracing::error!("Tool handler panicked");
                    error_response(id, -32603, "Internal error")
                }
            }
        }
        "notifications/initialized" => String::new(),
        _ => error_response(id, -32601, &format!("Method not found: {method}")),
    }
}

fn handle_initialize(id: serde_json::Value) -> String {
    let result = serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {},
            "notifications": { "pair_update": {} }
        },
        "serverInfo": {
            "name": "tandem",
            "version": env!("CARGO_PKG_VERSION")
        }
    });
    success_response(id, result)
}

pub(crate) fn success_response(id: serde_json::Value, result: serde_json::Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
    .to_string()
}

pub(crate) fn error_response(id: serde_json::Value, code: i64, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let out = error_response(serde_json::json!(4), -32601, "Method not found: x");
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["id"], 4);
        assert_eq!(v["error"]["code"], -32601);
    }

    #[test]
    fn test_success_response_shape() {
        let out = success_response(serde_json::json!("a"), serde_json::json!({"ok": true}));
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["result"]["ok"], true);
        assert_eq!(v["jsonrpc"], "2.0");
    }
}
