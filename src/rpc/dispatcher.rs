//! Line-delimited JSON-RPC dispatcher over stdio (§4.13).
//!
//! A single reader task parses one line at a time and feeds a bounded
//! `mpsc` channel; a configurable pool of worker tasks pop requests,
//! dispatch them, and write complete response lines to a mutex-guarded
//! stdout writer so two workers can never interleave partial JSON.

use crate::error::{Result, RpcError};
use crate::rpc::protocol::{RpcErrorBody, RpcRequest, RpcResponse, ToolDescriptor, PROTOCOL_VERSION};
use crate::rpc::tools::{self, ServiceContext};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

/// Dispatcher tuning, per §4.13/§4.14.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Number of concurrent worker tasks draining the request channel.
    pub workers: usize,
    /// Bounded channel capacity between the reader and the worker pool.
    pub queue_capacity: usize,
    /// Per-call timeout before `{code: -32000, message: "Request timeout"}`.
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { workers: 1, queue_capacity: 64, call_timeout: Duration::from_secs(30) }
    }
}

struct Shared {
    ctx: ServiceContext,
    initialized: AtomicBool,
    stdout: Mutex<tokio::io::Stdout>,
}

/// Runs the dispatcher to completion: reads stdin until EOF, processing
/// requests against `ctx`. Returns once stdin closes and all in-flight
/// work drains.
///
/// # Errors
///
/// Returns an error only if stdin cannot be read at all; malformed
/// individual lines are reported back as JSON-RPC error responses, not
/// propagated here.
pub async fn run(ctx: ServiceContext, config: DispatcherConfig) -> Result<()> {
    let shared = Arc::new(Shared { ctx, initialized: AtomicBool::new(false), stdout: Mutex::new(tokio::io::stdout()) });

    let (tx, rx) = mpsc::channel::<String>(config.queue_capacity);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let shared = Arc::clone(&shared);
        let rx = Arc::clone(&rx);
        workers.push(tokio::spawn(async move {
            loop {
                let line = { rx.lock().await.recv().await };
                let Some(line) = line else { break };
                handle_line(&shared, &line, config.call_timeout).await;
            }
        }));
    }

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await.map_err(crate::error::Error::Io)? {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(line).await.is_err() {
            break;
        }
    }
    drop(tx);

    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

/// Parses one request line in two steps so "not JSON at all" and "JSON but
/// not a valid request" map to distinct JSON-RPC codes: -32700 when `line`
/// isn't even well-formed JSON, -32600 when it parses but doesn't satisfy
/// [`RpcRequest`]'s shape (missing `method`, wrong `id`/`params` types).
fn parse_request(line: &str) -> std::result::Result<RpcRequest, RpcError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RpcError::ParseError)?;
    serde_json::from_value(value).map_err(|_| RpcError::InvalidRequest)
}

async fn handle_line(shared: &Shared, line: &str, timeout: Duration) {
    let request = match parse_request(line) {
        Ok(r) => r,
        Err(rpc_err) => {
            write_response(shared, RpcResponse::failure(Value::Null, RpcErrorBody::from_rpc_error(&rpc_err))).await;
            return;
        }
    };

    let id = request.id.clone().unwrap_or(Value::Null);
    let is_notification = request.is_notification();

    let outcome = tokio::time::timeout(timeout, dispatch(shared, &request)).await;
    let response = match outcome {
        Ok(Ok(result)) => {
            if is_notification {
                return;
            }
            RpcResponse::success(id, result)
        }
        Ok(Err(err)) => {
            if is_notification {
                return;
            }
            RpcResponse::failure(id, error_body(&err))
        }
        Err(_) => {
            if is_notification {
                return;
            }
            RpcResponse::failure(id, RpcErrorBody::timeout())
        }
    };
    write_response(shared, response).await;
}

fn error_body(err: &crate::error::Error) -> RpcErrorBody {
    match err {
        crate::error::Error::Rpc(rpc_err) => RpcErrorBody::from_rpc_error(rpc_err),
        other => RpcErrorBody { code: -32000, message: other.to_string() },
    }
}

async fn dispatch(shared: &Shared, request: &RpcRequest) -> Result<Value> {
    match request.method.as_str() {
        "initialize" => {
            shared.initialized.store(false, Ordering::SeqCst);
            Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": "vibefork", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} }
            }))
        }
        "notifications/initialized" => {
            shared.initialized.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
        "tools/list" => {
            let tools: Vec<ToolDescriptor> = tools::catalog();
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            if !shared.initialized.load(Ordering::SeqCst) {
                return Err(RpcError::Uninitialized.into());
            }
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::InvalidParams("missing `name`".to_string()))?;
            let empty = json!({});
            let arguments = request.params.get("arguments").unwrap_or(&empty);
            tools::call(&shared.ctx, name, arguments)
        }
        other => Err(RpcError::MethodNotFound(other.to_string()).into()),
    }
}

async fn write_response(shared: &Shared, response: RpcResponse) {
    let Ok(mut line) = serde_json::to_string(&response) else { return };
    line.push('\n');
    let mut stdout = shared.stdout.lock().await;
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}
