//! # DShield MCP Protocol
//!
//! JSON-RPC 2.0 message types, the bounded frame validator, free-form string
//! sanitation, and the stable wire error taxonomy. Everything that decides
//! whether bytes from a client become a well-formed MCP message lives here;
//! business logic stays out.

#![deny(missing_docs)]

pub mod error;
pub mod jsonrpc;
pub mod sanitize;
pub mod validation;

pub use error::{McpError, McpErrorKind};
pub use jsonrpc::{
    Frame, JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
pub use sanitize::{SanitizeOptions, sanitize_string};
pub use validation::{FrameValidator, MAX_MESSAGE_SIZE, MAX_NESTING_DEPTH};
