//! # DShield MCP Transports
//!
//! Newline-delimited JSON framing over stdio (default) and TCP (optional,
//! API-key handshake). Frames are read one at a time per connection;
//! request handlers run concurrently up to a per-connection cap, and
//! responses go out in completion order. The JSON-RPC id preserves
//! correspondence.

pub mod connection;
pub mod stdio;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::watch;

use dshield_mcp_protocol::jsonrpc::{
    Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

pub use connection::{CONNECTION_CONCURRENCY, ConnectionInfo, DRAIN_TIMEOUT, MAX_LINE_LENGTH};
pub use stdio::serve_stdio;
pub use tcp::{TcpServerConfig, serve_tcp};

/// What a transport needs from the server: frame validation, the request
/// pipeline, notification handling, handshake authentication, and the
/// shutdown signal.
#[async_trait]
pub trait McpService: Send + Sync + 'static {
    /// Run the frame gauntlet over one raw line; `None` drops the message
    /// without closing the connection.
    fn validate_frame(&self, raw: &[u8]) -> Option<Frame>;

    /// Handle one request end to end.
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        conn: &ConnectionInfo,
    ) -> JsonRpcResponse;

    /// Handle one notification. Returns `true` when the server should begin
    /// shutting down.
    fn handle_notification(&self, note: &JsonRpcNotification, conn: &ConnectionInfo) -> bool;

    /// Authenticate a TCP handshake key.
    fn authenticate(&self, api_key: &str) -> bool;

    /// A connection went away; release its state.
    fn connection_closed(&self, conn: &ConnectionInfo);

    /// Flips to `true` when shutdown begins.
    fn shutdown_receiver(&self) -> watch::Receiver<bool>;
}
