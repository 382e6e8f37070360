//! # DShield MCP Server
//!
//! The server core: configuration and secret resolution, feature management,
//! the tool registry, hierarchical rate limiting, request dispatch, the tool
//! handlers themselves, and health/metrics reporting. Transports deliver
//! validated frames in; JSON-RPC responses come out.

pub mod campaign;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod report;
pub mod server;

pub use config::{ConfigError, NoopSecretResolver, SecretResolver, ServerConfig};
pub use context::ServerContext;
pub use dispatch::{Dispatcher, ToolHandler};
pub use features::FeatureManager;
pub use registry::{ToolCategory, ToolDescriptor, ToolRegistry};
pub use dshield_mcp_transport::ConnectionInfo;
pub use server::ServerCore;
