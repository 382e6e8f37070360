//! Monitoring-category tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use dshield_mcp_protocol::McpError;

use crate::context::ServerContext;
use crate::dispatch::ToolHandler;
use crate::handlers::opt_bool;
use crate::health;

/// `get_health_status`: feature states, breaker states, and counters. The
/// one tool that stays available no matter what is down.
#[derive(Debug)]
pub struct HealthStatusHandler;

#[async_trait]
impl ToolHandler for HealthStatusHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let detailed = opt_bool(&arguments, "detailed").unwrap_or(false);

        // A detailed check re-probes the dependencies so the report reflects
        // the present, not startup.
        if detailed {
            ctx.features.probe_all(&ctx.elastic, &ctx.dshield).await;
        }
        Ok(health::snapshot(&ctx, detailed))
    }
}
