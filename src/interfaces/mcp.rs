//! Model Context Protocol server over newline-delimited JSON-RPC.
//!
//! One writer task owns the output stream. Each `tools/call` runs on its own
//! task so a long workflow never blocks `ping` or a cancellation notice.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::progress::{ChannelProgress, ProgressEvent, ProgressLevel};
use crate::core::tools::{self, Toolbox};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_PARAMS: i64 = -32602;
const METHOD_NOT_FOUND: i64 = -32601;

/// Incoming message: a request when `id` is present, a notification otherwise.
#[derive(Deserialize, Debug, Clone)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Serialize, Debug, Clone)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({ "code": code, "message": message.into() })),
        }
    }
}

#[derive(Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn request_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn progress_notification(event: &ProgressEvent, logger: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": {
            "level": match event.level {
                ProgressLevel::Info => "info",
                ProgressLevel::Warning => "warning",
                ProgressLevel::Error => "error",
            },
            "logger": logger,
            "data": event.message,
        }
    })
}

pub struct McpServer {
    toolbox: Arc<Toolbox>,
    name: String,
    in_flight: InFlight,
}

impl McpServer {
    pub fn new(toolbox: Arc<Toolbox>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            toolbox,
            name: name.into(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until the input stream closes, then drain in-flight calls.
    pub async fn serve<R, W>(self: Arc<Self>, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("MCP server '{}' listening on stdio", self.name);
        let (tx, mut rx) = mpsc::channel::<String>(100);

        let mut writer = tokio::io::BufWriter::new(output);
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                debug!("MCP TX: {}", msg);
                if let Err(e) = writer.write_all(format!("{}\n", msg).as_bytes()).await {
                    error!("Failed to write MCP output: {}", e);
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        let mut calls = JoinSet::new();
        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("MCP RX: {}", line);
            let message = match serde_json::from_str::<JsonRpcMessage>(line) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Unparsed MCP RX: {}", line);
                    send(&tx, &JsonRpcResponse::err(Value::Null, PARSE_ERROR, e.to_string())).await;
                    continue;
                }
            };
            self.clone().handle(message, &tx, &mut calls).await;
            while calls.try_join_next().is_some() {}
        }

        info!("MCP input closed, waiting for {} in-flight call(s)", calls.len());
        while calls.join_next().await.is_some() {}
        drop(tx);
        let _ = writer_task.await;
        Ok(())
    }

    async fn handle(
        self: Arc<Self>,
        message: JsonRpcMessage,
        tx: &mpsc::Sender<String>,
        calls: &mut JoinSet<()>,
    ) {
        let Some(id) = message.id else {
            self.handle_notification(&message.method, message.params).await;
            return;
        };

        let response = match message.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {}, "logging": {} },
                    "serverInfo": { "name": self.name, "version": env!("CARGO_PKG_VERSION") }
                }),
            ),
            "ping" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": tools::descriptors() })),
            "tools/call" => {
                let params = message.params.unwrap_or(Value::Null);
                match serde_json::from_value::<CallParams>(params) {
                    Ok(params) => {
                        // Registered before the spawn so an immediate cancel finds it.
                        let cancel = CancellationToken::new();
                        self.in_flight
                            .lock()
                            .await
                            .insert(request_key(&id), cancel.clone());
                        let tx = tx.clone();
                        calls.spawn(self.run_call(id, params, cancel, tx));
                        return;
                    }
                    Err(e) => JsonRpcResponse::err(id, INVALID_PARAMS, e.to_string()),
                }
            }
            other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {}", other)),
        };
        send(tx, &response).await;
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            "notifications/initialized" => debug!("MCP client initialized"),
            "notifications/cancelled" => {
                let Some(request_id) = params.as_ref().and_then(|p| p.get("requestId")) else {
                    return;
                };
                let key = request_key(request_id);
                if let Some(token) = self.in_flight.lock().await.get(&key) {
                    info!("Cancelling in-flight call {}", key);
                    token.cancel();
                }
            }
            other => debug!("Ignoring notification {}", other),
        }
    }

    async fn run_call(
        self: Arc<Self>,
        id: Value,
        params: CallParams,
        cancel: CancellationToken,
        tx: mpsc::Sender<String>,
    ) {
        let key = request_key(&id);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let forward_tx = tx.clone();
        let logger = params.name.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let note = progress_notification(&event, &logger).to_string();
                if forward_tx.send(note).await.is_err() {
                    break;
                }
            }
        });

        let progress = ChannelProgress::new(progress_tx);
        let result = self
            .toolbox
            .dispatch(&params.name, params.arguments, &progress, &cancel)
            .await;
        drop(progress);
        let _ = forwarder.await;
        self.in_flight.lock().await.remove(&key);

        let text = serde_json::to_string(&result).unwrap_or_else(|e| e.to_string());
        let response = JsonRpcResponse::ok(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": !result.success,
            }),
        );
        send(&tx, &response).await;
    }
}

async fn send(tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if tx.send(line).await.is_err() {
                warn!("MCP writer closed, dropping response");
            }
        }
        Err(e) => error!("Failed to encode MCP response: {}", e),
    }
}
