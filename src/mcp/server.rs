//! Protocol server instance, one per session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use super::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JSONRPC_VERSION, JsonRpcError, JsonRpcMessage, JsonRpcResponse, methods,
    negotiate_version,
};
use super::transport::SessionTransport;
use crate::tools::{self, HighlightTools, ToolCallError};
use crate::{Error, Result};

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "actuation-gateway";

/// Isolated MCP server bound to one session's transport
pub struct McpServer {
    tools: HighlightTools,
    transport: OnceLock<Weak<SessionTransport>>,
    protocol_version: OnceLock<&'static str>,
    client_info: OnceLock<Implementation>,
    client_ready: AtomicBool,
    closed: AtomicBool,
}

impl McpServer {
    #[must_use]
    pub fn new(tools: HighlightTools) -> Self {
        Self {
            tools,
            transport: OnceLock::new(),
            protocol_version: OnceLock::new(),
            client_info: OnceLock::new(),
            client_ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind this server to a transport; inbound messages on the transport
    /// are routed here and notifications go out through it
    ///
    /// # Errors
    ///
    /// Returns error if either side is already connected
    pub fn connect(self: &Arc<Self>, transport: &Arc<SessionTransport>) -> Result<()> {
        self.transport
            .set(Arc::downgrade(transport))
            .map_err(|_| Error::Protocol("server already connected".to_string()))?;
        transport.bind(self.clone())
    }

    /// Negotiated protocol revision, once initialized
    #[must_use]
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.protocol_version.get().copied()
    }

    /// Client name and version sent with `initialize`
    #[must_use]
    pub fn client_info(&self) -> Option<&Implementation> {
        self.client_info.get()
    }

    /// Whether the client acknowledged the handshake
    #[must_use]
    pub fn client_ready(&self) -> bool {
        self.client_ready.load(Ordering::Acquire)
    }

    /// Shut the server down; further requests are refused
    ///
    /// # Errors
    ///
    /// Returns error if the server was already closed
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Protocol("server already closed".to_string()));
        }
        Ok(())
    }

    /// Handle one inbound message, returning the response for requests
    pub async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let Some(method) = message.method.as_deref() else {
            // Response to a server-initiated request; none are issued
            tracing::debug!(id = ?message.id, "ignoring client response");
            return None;
        };

        let Some(id) = message.id.clone() else {
            self.handle_notification(method);
            return None;
        };

        if message.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                Some(id),
                JsonRpcError::with_data(
                    JsonRpcError::INVALID_REQUEST,
                    "Invalid JSON-RPC version",
                    serde_json::json!({ "expected": JSONRPC_VERSION, "got": message.jsonrpc }),
                ),
            ));
        }

        if self.closed.load(Ordering::Acquire) {
            return Some(JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(JsonRpcError::INVALID_REQUEST, "Server closed"),
            ));
        }

        let params = message.params.unwrap_or(serde_json::Value::Null);
        let result = match method {
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(serde_json::json!({})),
            methods::TOOLS_LIST => Ok(serde_json::json!({ "tools": tools::definitions() })),
            methods::TOOLS_CALL => self.call_tool(params).await,
            other => Err(JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => {
                tracing::debug!(method, code = error.code, message = %error.message, "request failed");
                JsonRpcResponse::error(Some(id), error)
            }
        })
    }

    fn handle_notification(&self, method: &str) {
        match method {
            methods::INITIALIZED => {
                self.client_ready.store(true, Ordering::Release);
                tracing::debug!("client acknowledged initialization");
            }
            other => tracing::trace!(method = other, "ignoring notification"),
        }
    }

    fn initialize(
        &self,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, JsonRpcError> {
        if self.protocol_version.get().is_some() {
            return Err(JsonRpcError::new(
                JsonRpcError::INVALID_REQUEST,
                "Server already initialized",
            ));
        }

        let params: InitializeParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()))?;

        let version = negotiate_version(&params.protocol_version);
        let _ = self.protocol_version.set(version);
        if let Some(client) = params.client_info {
            tracing::info!(client = %client.name, client_version = %client.version, protocol = version, "client initializing");
            let _ = self.client_info.set(client);
        }

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: serde_json::json!({
                "tools": { "listChanged": false },
                "logging": {}
            }),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
    }

    async fn call_tool(
        &self,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()))?;

        let outcome = self
            .tools
            .call(&params.name, params.arguments)
            .await
            .map_err(|e: ToolCallError| {
                JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string())
            })?;

        let text = serde_json::to_string(&outcome)
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))?;

        self.notify_log(
            if outcome.ok { "info" } else { "warning" },
            serde_json::json!({ "tool": params.name, "result": outcome }),
        );

        serde_json::to_value(CallToolResult::text(text, !outcome.ok))
            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
    }

    /// Push a `notifications/message` log entry to the client, if it listens
    fn notify_log(&self, level: &str, data: serde_json::Value) {
        let Some(transport) = self.transport.get().and_then(Weak::upgrade) else {
            return;
        };
        transport.push(JsonRpcMessage::notification(
            methods::LOG_MESSAGE,
            Some(serde_json::json!({ "level": level, "logger": SERVER_NAME, "data": data })),
        ));
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("protocol_version", &self.protocol_version())
            .field("client", &self.client_info().map(|c| c.name.as_str()))
            .field("client_ready", &self.client_ready())
            .finish_non_exhaustive()
    }
}
