//! Stdio transport: the default MCP wiring.

use std::sync::Arc;

use tracing::info;

use crate::connection::{ConnectionInfo, run_connection};
use crate::McpService;

/// Serve one session over the process's stdin/stdout. Returns when the
/// client closes stdin or shutdown is triggered.
pub async fn serve_stdio<S: McpService>(service: Arc<S>) -> std::io::Result<()> {
    let conn = ConnectionInfo::stdio();
    info!(connection = %conn.id, "serving MCP over stdio");
    run_connection(service, conn, tokio::io::stdin(), tokio::io::stdout()).await;
    Ok(())
}
