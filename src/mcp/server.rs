//! MCP Server implementation
//!
//! JSON-RPC 2.0 over a line-delimited byte stream (stdio in production).
//! Lifecycle and listing methods are answered in order on the read loop;
//! each `tools/call` runs on its own task so a long navigation call does not
//! hold up the rest. All responses go through one writer task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::{DispatchError, ToolDispatcher};
use super::protocol::*;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "world-avatar-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server that handles JSON-RPC 2.0 requests over a byte stream
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
    initialized: AtomicBool,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            initialized: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled when the transport closes; cancel it to close the transport
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve on the process's stdin/stdout
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until EOF on `reader` or until the shutdown token fires
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let mut in_flight = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();

        info!("MCP server starting");

        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Transport close requested");
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(l)) => l,
                Ok(None) => {
                    info!("Client closed the transport");
                    break;
                }
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::parse_error(e.to_string()),
                    ));
                    continue;
                }
            };

            let Some(id) = request.id.clone() else {
                self.handle_notification(&request);
                continue;
            };

            if request.method == "tools/call" {
                let server = self.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let response = match server.handle_tools_call(&request.params).await {
                        Ok(value) => JsonRpcResponse::success(id, value),
                        Err(error) => JsonRpcResponse::error(id, error),
                    };
                    let _ = tx.send(response);
                });
            } else {
                let response = match self.handle_request(&request) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(error) => JsonRpcResponse::error(id, error),
                };
                let _ = tx.send(response);
            }

            // reap finished calls
            while in_flight.try_join_next().is_some() {}
        }

        if !in_flight.is_empty() {
            warn!(pending = in_flight.len(), "Abandoning in-flight tool calls");
        }
        in_flight.shutdown().await;
        drop(tx);
        if let Err(e) = writer_task.await {
            error!("Writer task failed: {}", e);
        }

        self.shutdown.cancel();
        info!("MCP server shutting down");
        Ok(())
    }

    /// Handle a notification (no response expected)
    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => {
                info!("Client confirmed initialization");
            }
            "notifications/cancelled" => {
                warn!("Request cancelled by client");
            }
            _ => {
                debug!("Unknown notification: {}", request.method);
            }
        }
    }

    /// Handle a request and return the result or error
    fn handle_request(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(&request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "resources/list" => self.handle_resources_list(),
            "resources/read" => self.handle_resources_read(&request.params),
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        }
    }

    fn ensure_initialized(&self) -> Result<(), JsonRpcError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JsonRpcError::invalid_request("Server not initialized"))
        }
    }

    fn handle_initialize(&self, params: &Option<Value>) -> Result<Value, JsonRpcError> {
        let params: Option<InitializeParams> = params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        if let Some(params) = &params {
            info!(
                "Initializing MCP server (client protocol: {})",
                params.protocol_version
            );
            if let Some(client) = &params.client_info {
                info!(
                    "Client: {} v{}",
                    client.name,
                    client.version.as_deref().unwrap_or("unknown")
                );
            }
        }

        self.initialized.store(true, Ordering::SeqCst);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ListChanged {
                    list_changed: false,
                },
                resources: ListChanged {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        self.ensure_initialized()?;
        let result = ToolsListResult {
            tools: self.dispatcher.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn handle_resources_list(&self) -> Result<Value, JsonRpcError> {
        self.ensure_initialized()?;
        let result = ResourcesListResult {
            resources: self.dispatcher.list_resources(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn handle_resources_read(&self, params: &Option<Value>) -> Result<Value, JsonRpcError> {
        self.ensure_initialized()?;
        let params: ResourceReadParams = parse_params(params)?;

        let content = self.dispatcher.read_resource(&params.uri).map_err(|e| {
            debug!(uri = %params.uri, error = %e, "Resource read failed");
            JsonRpcError::from(e)
        })?;
        let result = ResourceReadResult {
            contents: vec![content],
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Session failures become `isError` results; everything else is a protocol error
    async fn handle_tools_call(&self, params: &Option<Value>) -> Result<Value, JsonRpcError> {
        self.ensure_initialized()?;
        let params: ToolCallParams = parse_params(params)?;

        info!("Tool call: {}", params.name);
        debug!("Arguments: {:?}", params.arguments);

        let tool_result = match self
            .dispatcher
            .call(&params.name, params.arguments.as_ref())
            .await
        {
            Ok(text) => ToolCallResult::success(text),
            Err(DispatchError::Session(e)) => {
                warn!(tool = %params.name, kind = e.kind(), "Tool error: {}", e);
                ToolCallResult::error(format!("{}: {}", e.kind(), e))
            }
            Err(e) => {
                warn!(tool = %params.name, kind = e.kind(), "Tool call rejected: {}", e);
                return Err(e.into());
            }
        };

        serde_json::to_value(tool_result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: &Option<Value>) -> Result<T, JsonRpcError> {
    let params = params
        .as_ref()
        .ok_or_else(|| JsonRpcError::invalid_params("params required"))?;
    serde_json::from_value(params.clone()).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode response: {}", e);
                continue;
            }
        };
        debug!("Sending: {}", json);
        json.push('\n');

        if let Err(e) = writer.write_all(json.as_bytes()).await {
            error!("Failed to write response: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("Failed to flush response: {}", e);
            break;
        }
    }
}
