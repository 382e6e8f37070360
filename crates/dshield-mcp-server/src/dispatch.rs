//! Tool dispatch.
//!
//! A table of tagged handlers keyed by tool name, with a category-level
//! fallback table. Dispatch resolves the effective timeout as the minimum of
//! the caller's cap, the descriptor's timeout, and the global ceiling, and
//! cancels the handler future on expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use dshield_mcp_protocol::McpError;

use crate::context::ServerContext;
use crate::registry::{GLOBAL_TIMEOUT_CEILING, ToolCategory};

/// One tool's handler: a single async unit of work. No further dispatch
/// happens inside a handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool.
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError>;
}

/// Fallback handler for a whole category.
#[async_trait]
pub trait CategoryHandler: Send + Sync {
    /// Execute a tool of this category by name.
    async fn call(
        &self,
        tool: &str,
        arguments: Value,
        ctx: Arc<ServerContext>,
    ) -> Result<Value, McpError>;
}

/// The dispatch tables.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    category_handlers: HashMap<ToolCategory, Arc<dyn CategoryHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field(
                "category_handlers",
                &self.category_handlers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    /// Empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one tool.
    pub fn register(&mut self, tool: &str, handler: Arc<dyn ToolHandler>) {
        debug!(tool, "registered tool handler");
        self.handlers.insert(tool.to_string(), handler);
    }

    /// Register the fallback handler for a category.
    pub fn register_category(&mut self, category: ToolCategory, handler: Arc<dyn CategoryHandler>) {
        debug!(category = category.as_str(), "registered category handler");
        self.category_handlers.insert(category, handler);
    }

    /// Dispatch one validated, feature-gated tool call.
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: Value,
        ctx: Arc<ServerContext>,
        caller_timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let descriptor = ctx
            .registry
            .get(tool)
            .ok_or_else(|| McpError::unknown_tool(tool))?;

        let mut timeout = descriptor.timeout.min(GLOBAL_TIMEOUT_CEILING);
        if let Some(cap) = caller_timeout {
            timeout = timeout.min(cap);
        }

        type DispatchFuture =
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, McpError>> + Send>>;

        let future: DispatchFuture = if let Some(handler) = self.handlers.get(tool) {
            let handler = Arc::clone(handler);
            let tool = tool.to_string();
            Box::pin(async move {
                handler.call(arguments, ctx).await.inspect_err(|e| {
                    debug!(tool, error = %e, "tool handler returned error");
                })
            })
        } else if let Some(handler) = self.category_handlers.get(&descriptor.category) {
            let handler = Arc::clone(handler);
            let tool = tool.to_string();
            Box::pin(async move { handler.call(&tool, arguments, ctx).await })
        } else {
            warn!(tool, "descriptor registered without a handler");
            return Err(McpError::unknown_tool(tool));
        };

        match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool, timeout_ms = timeout.as_millis() as u64, "tool call timed out");
                Err(McpError::timeout(tool, timeout.as_millis() as u64))
            }
        }
    }
}
