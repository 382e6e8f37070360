//! The server core.
//!
//! One value per process: owns the context, the dispatch tables, and the
//! frame validator, and exposes the request pipeline the transports drive:
//! validate → rate limit → feature gate → dispatch → response. Shutdown is
//! a watch channel the transports and the binary both observe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use dshield_mcp_protocol::McpError;
use dshield_mcp_protocol::jsonrpc::{
    Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use dshield_mcp_protocol::validation::{FrameValidator, SchemaError};
use dshield_mcp_transport::{ConnectionInfo, McpService};

use crate::context::ServerContext;
use crate::dispatch::Dispatcher;
use crate::handlers;
use crate::registry::GLOBAL_TIMEOUT_CEILING;

/// MCP protocol revision answered to `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server construction errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerBuildError {
    /// A tool schema failed to compile or was registered twice.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The assembled server.
#[derive(Debug)]
pub struct ServerCore {
    ctx: Arc<ServerContext>,
    dispatcher: Dispatcher,
    validator: FrameValidator,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerCore {
    /// Assemble the server: handler table, compiled tool schemas, shutdown
    /// channel.
    pub fn new(ctx: ServerContext) -> Result<Self, ServerBuildError> {
        let ctx = Arc::new(ctx);

        let mut dispatcher = Dispatcher::new();
        handlers::register_builtin(&mut dispatcher);

        let mut validator = FrameValidator::new();
        for descriptor in ctx.registry.all() {
            validator.register_tool_schema(&descriptor.name, &descriptor.parameter_schema)?;
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            ctx,
            dispatcher,
            validator,
            shutdown_tx,
        })
    }

    /// The shared context.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// A receiver that flips to `true` when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Begin graceful shutdown.
    pub fn trigger_shutdown(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the frame gauntlet over one raw line. `None` means the message
    /// was dropped (and logged); the connection stays open either way.
    pub fn validate_frame(&self, raw: &[u8]) -> Option<Frame> {
        self.validator.validate_frame(raw)
    }

    /// Authenticate a TCP handshake key. The transport is trusted upstream;
    /// any plausible key is accepted and given its configured rate bucket.
    pub fn authenticate(&self, api_key: &str) -> bool {
        let plausible = !api_key.is_empty()
            && api_key.len() <= 256
            && api_key.chars().all(|c| c.is_ascii_graphic());
        if plausible {
            self.ctx.rate_limits.register_key(api_key);
        }
        plausible
    }

    /// Release per-connection limiter state when a connection closes.
    pub fn connection_closed(&self, conn: &ConnectionInfo) {
        self.ctx.rate_limits.connections.remove_connection(&conn.id);
    }

    /// Handle one request end to end. Always produces a response carrying
    /// the inbound id.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        conn: &ConnectionInfo,
    ) -> JsonRpcResponse {
        self.ctx.metrics.record_request();
        let id = request.id.clone();
        match self.process(request, conn).await {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(err) => {
                self.ctx.metrics.record_error(err.kind);
                debug!(kind = err.kind.as_str(), connection = %conn.id, "request failed");
                JsonRpcResponse::error(err.to_json_rpc(), id)
            }
        }
    }

    /// Handle one notification. Returns `true` when the server should shut
    /// down.
    pub fn handle_notification(&self, note: &JsonRpcNotification, conn: &ConnectionInfo) -> bool {
        self.ctx.metrics.record_notification();
        match note.method.as_str() {
            "initialized" | "notifications/initialized" => {
                debug!(connection = %conn.id, "client initialized");
                false
            }
            "shutdown" | "notifications/shutdown" => {
                self.trigger_shutdown();
                true
            }
            other => {
                debug!(method = other, "ignoring unknown notification");
                false
            }
        }
    }

    async fn process(
        &self,
        request: JsonRpcRequest,
        conn: &ConnectionInfo,
    ) -> Result<Value, McpError> {
        self.ctx
            .rate_limits
            .check(conn.api_key.as_deref(), &conn.id)?;

        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "dshield-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.ctx.registry.list_payload(&self.ctx.features)),
            "tools/call" => self.call_tool(request.params.unwrap_or(Value::Null)).await,
            other => Err(McpError::new(
                dshield_mcp_protocol::McpErrorKind::UnknownTool,
                format!("method not found: {other}"),
            )),
        }
    }

    async fn call_tool(&self, params: Value) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("tool name is required", "/name"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let descriptor = self
            .ctx
            .registry
            .get(name)
            .ok_or_else(|| McpError::unknown_tool(name))?;

        self.validator.validate_tool_arguments(name, &arguments)?;
        self.ctx.features.require_all(&descriptor.required_features)?;
        self.ctx.metrics.record_tool_call(name);

        let caller_timeout = params
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .map(|d| d.min(GLOBAL_TIMEOUT_CEILING));

        let started = std::time::Instant::now();
        let result = self
            .dispatcher
            .dispatch(name, arguments, self.context(), caller_timeout)
            .await;
        match &result {
            Ok(_) => debug!(tool = name, elapsed_ms = started.elapsed().as_millis() as u64, "tool call completed"),
            Err(err) => warn!(tool = name, kind = err.kind.as_str(), "tool call failed"),
        }
        result
    }
}

#[async_trait]
impl McpService for ServerCore {
    fn validate_frame(&self, raw: &[u8]) -> Option<Frame> {
        ServerCore::validate_frame(self, raw)
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        conn: &ConnectionInfo,
    ) -> JsonRpcResponse {
        ServerCore::handle_request(self, request, conn).await
    }

    fn handle_notification(&self, note: &JsonRpcNotification, conn: &ConnectionInfo) -> bool {
        ServerCore::handle_notification(self, note, conn)
    }

    fn authenticate(&self, api_key: &str) -> bool {
        ServerCore::authenticate(self, api_key)
    }

    fn connection_closed(&self, conn: &ConnectionInfo) {
        ServerCore::connection_closed(self, conn)
    }

    fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        ServerCore::shutdown_receiver(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dshield_mcp_core::{FeatureState, FeatureTag};
    use dshield_mcp_protocol::jsonrpc::RequestId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::config::ServerConfig;

    fn server() -> ServerCore {
        let ctx = ServerContext::new(ServerConfig::default()).expect("context builds");
        ServerCore::new(ctx).expect("server builds")
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(method, Some(params), RequestId::from(1))
    }

    fn conn() -> ConnectionInfo {
        ConnectionInfo::stdio()
    }

    #[tokio::test]
    async fn test_tools_list_honors_feature_gating() {
        let server = server();
        let response = server.handle_request(request("tools/list", json!({})), &conn()).await;
        let result = response.result().expect("success").clone();
        let names: Vec<&str> = result["tools"]
            .as_array()
            .expect("tools")
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        // No probes have run: only feature-free tools are listed.
        assert_eq!(names, vec!["get_data_dictionary", "get_health_status"]);
    }

    #[tokio::test]
    async fn test_tools_list_idempotent() {
        let server = server();
        let first = server.handle_request(request("tools/list", json!({})), &conn()).await;
        let second = server.handle_request(request("tools/list", json!({})), &conn()).await;
        assert_eq!(
            serde_json::to_string(first.result().expect("ok")).expect("serializes"),
            serde_json::to_string(second.result().expect("ok")).expect("serializes"),
        );
    }

    #[tokio::test]
    async fn test_gated_tool_returns_feature_unavailable() {
        let server = server();
        let response = server
            .handle_request(
                request(
                    "tools/call",
                    json!({"name": "query_dshield_events", "arguments": {}}),
                ),
                &conn(),
            )
            .await;
        let error = response.error_object().expect("error");
        assert_eq!(error.code, -32011);
        assert_eq!(error.data.as_ref().expect("data")["feature"], "elasticsearch");
    }

    #[tokio::test]
    async fn test_unknown_tool_code() {
        let server = server();
        let response = server
            .handle_request(
                request("tools/call", json!({"name": "no_such_tool", "arguments": {}})),
                &conn(),
            )
            .await;
        assert_eq!(response.error_object().expect("error").code, -32601);
    }

    #[tokio::test]
    async fn test_schema_violation_returns_invalid_params_with_pointer() {
        let server = server();
        server
            .context()
            .features
            .set(FeatureTag::Elasticsearch, FeatureState::Available);
        let response = server
            .handle_request(
                request(
                    "tools/call",
                    json!({
                        "name": "stream_dshield_events_with_session_context",
                        "arguments": {"chunk_size": 9999}
                    }),
                ),
                &conn(),
            )
            .await;
        let error = response.error_object().expect("error");
        assert_eq!(error.code, -32602);
        assert_eq!(error.data.as_ref().expect("data")["pointer"], "/chunk_size");
    }

    #[tokio::test]
    async fn test_health_tool_works_with_everything_down() {
        let server = server();
        let response = server
            .handle_request(
                request("tools/call", json!({"name": "get_health_status", "arguments": {}})),
                &conn(),
            )
            .await;
        let result = response.result().expect("health always answers");
        assert_eq!(result["status"], "degraded");
    }

    #[tokio::test]
    async fn test_oversized_frame_dropped_connection_still_usable() {
        let server = server();
        let conn = conn();

        let mut big = Vec::with_capacity(12 * 1024 * 1024);
        big.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{"pad":""#);
        big.resize(12 * 1024 * 1024, b'a');
        big.extend_from_slice(br#""}}"#);
        assert!(server.validate_frame(&big).is_none(), "oversized frame dropped");

        let well_formed =
            br#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let frame = server.validate_frame(well_formed).expect("next frame accepted");
        let Frame::Request(request) = frame else {
            panic!("expected request frame");
        };
        let response = server.handle_request(request, &conn).await;
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_notifications_and_shutdown() {
        let server = server();
        let conn = conn();
        let note = JsonRpcNotification::new("notifications/initialized", None);
        assert!(!server.handle_notification(&note, &conn));

        let mut rx = server.shutdown_receiver();
        assert!(!*rx.borrow());
        let shutdown = JsonRpcNotification::new("shutdown", None);
        assert!(server.handle_notification(&shutdown, &conn));
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_rate_limited_request_carries_retry_after() {
        let server = server();
        let conn = ConnectionInfo {
            id: "conn-rl".to_string(),
            api_key: Some("key-rl".to_string()),
            peer: None,
        };
        // The unknown-key default bucket is small; drain it.
        let mut last = None;
        for _ in 0..=crate::rate_limit::UNKNOWN_KEY_RPM {
            last = Some(
                server
                    .handle_request(request("tools/list", json!({})), &conn)
                    .await,
            );
        }
        let error = last.expect("ran").error_object().expect("limited").clone();
        assert_eq!(error.code, -32014);
        assert!(error.data.expect("data")["retry_after_ms"].as_u64().expect("ms") > 0);
    }

    #[test]
    fn test_authenticate_rules() {
        let server = server();
        assert!(server.authenticate("valid-key-123"));
        assert!(!server.authenticate(""));
        assert!(!server.authenticate("has space"));
        assert!(!server.authenticate(&"k".repeat(300)));
    }
}
