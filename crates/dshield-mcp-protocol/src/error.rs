//! The stable wire error taxonomy.
//!
//! Every failure a client can observe maps to one of these kinds, each with
//! a fixed JSON-RPC code. The `data` payload is always redacted detail;
//! stack traces, credentials, and backend identifiers never reach the wire.

use serde_json::{Value, json};

use crate::jsonrpc::JsonRpcError;

/// Error categories surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpErrorKind {
    /// Arguments failed per-tool schema validation.
    InvalidParams,
    /// No tool registered under the requested name.
    UnknownTool,
    /// A required feature is unavailable.
    FeatureUnavailable,
    /// The call exceeded its timeout.
    Timeout,
    /// A backend stayed unreachable after the retry budget.
    UpstreamUnavailable,
    /// A rate limit rejected the request.
    RateLimited,
    /// A cursor failed its fingerprint check or could not be decoded.
    InvalidCursor,
    /// Anything else; the catch-all that keeps the server up.
    Internal,
}

impl McpErrorKind {
    /// The stable JSON-RPC code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams => -32602,
            Self::UnknownTool => -32601,
            Self::FeatureUnavailable => -32011,
            Self::Timeout => -32012,
            Self::UpstreamUnavailable => -32013,
            Self::RateLimited => -32014,
            Self::InvalidCursor => -32015,
            Self::Internal => -32603,
        }
    }

    /// Counter label for observability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::UnknownTool => "unknown_tool",
            Self::FeatureUnavailable => "feature_unavailable",
            Self::Timeout => "timeout",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::RateLimited => "rate_limited",
            Self::InvalidCursor => "invalid_cursor",
            Self::Internal => "internal",
        }
    }

    /// All kinds, for counter initialization.
    pub const ALL: [McpErrorKind; 8] = [
        Self::InvalidParams,
        Self::UnknownTool,
        Self::FeatureUnavailable,
        Self::Timeout,
        Self::UpstreamUnavailable,
        Self::RateLimited,
        Self::InvalidCursor,
        Self::Internal,
    ];
}

/// A taxonomized error ready to cross the wire.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} ({}): {message}", kind.as_str(), kind.code())]
pub struct McpError {
    /// Error category.
    pub kind: McpErrorKind,
    /// User-safe message.
    pub message: String,
    /// Redacted detail object.
    pub data: Option<Value>,
}

impl McpError {
    /// Build an error with no detail payload.
    pub fn new(kind: McpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Invalid parameters, pointing at the failing argument.
    pub fn invalid_params(message: impl Into<String>, json_pointer: impl Into<String>) -> Self {
        Self {
            kind: McpErrorKind::InvalidParams,
            message: message.into(),
            data: Some(json!({ "pointer": json_pointer.into() })),
        }
    }

    /// The requested tool does not exist.
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(McpErrorKind::UnknownTool, format!("unknown tool: {name}"))
    }

    /// A required feature is down; `data` names it.
    pub fn feature_unavailable(feature: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: McpErrorKind::FeatureUnavailable,
            message: format!("feature '{feature}' is unavailable"),
            data: Some(json!({ "feature": feature, "reason": reason.into() })),
        }
    }

    /// The call ran out of time.
    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::new(
            McpErrorKind::Timeout,
            format!("{operation} timed out after {timeout_ms}ms"),
        )
    }

    /// A backend stayed unreachable after retries.
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::UpstreamUnavailable, message)
    }

    /// Rate limited; `data` carries the suggested wait.
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            kind: McpErrorKind::RateLimited,
            message: "rate limit exceeded".to_string(),
            data: Some(json!({ "retry_after_ms": retry_after_ms })),
        }
    }

    /// The cursor does not match the current query.
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::InvalidCursor, message)
    }

    /// Internal error with a deliberately generic message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Internal, message)
    }

    /// Attach a redacted detail object.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether a client may usefully retry this call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            McpErrorKind::Timeout | McpErrorKind::UpstreamUnavailable | McpErrorKind::RateLimited
        )
    }

    /// Render as a JSON-RPC error object.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.kind.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(McpErrorKind::InvalidParams.code(), -32602);
        assert_eq!(McpErrorKind::UnknownTool.code(), -32601);
        assert_eq!(McpErrorKind::FeatureUnavailable.code(), -32011);
        assert_eq!(McpErrorKind::Timeout.code(), -32012);
        assert_eq!(McpErrorKind::UpstreamUnavailable.code(), -32013);
        assert_eq!(McpErrorKind::RateLimited.code(), -32014);
        assert_eq!(McpErrorKind::InvalidCursor.code(), -32015);
        assert_eq!(McpErrorKind::Internal.code(), -32603);
    }

    #[test]
    fn test_invalid_params_carries_pointer() {
        let err = McpError::invalid_params("chunk_size out of range", "/chunk_size");
        let wire = err.to_json_rpc();
        assert_eq!(wire.code, -32602);
        assert_eq!(wire.data.expect("data")["pointer"], "/chunk_size");
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = McpError::rate_limited(750);
        let wire = err.to_json_rpc();
        assert_eq!(wire.data.expect("data")["retry_after_ms"], 750);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(McpError::timeout("query", 1000).is_retryable());
        assert!(McpError::upstream_unavailable("backend down").is_retryable());
        assert!(!McpError::unknown_tool("nope").is_retryable());
        assert!(!McpError::invalid_cursor("fingerprint mismatch").is_retryable());
    }
}
