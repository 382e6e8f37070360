//! Bounded validation of inbound frames.
//!
//! Every frame passes the same gauntlet before any business logic sees it:
//! size, UTF-8 well-formedness, JSON parse, nesting depth, container bounds,
//! then JSON-RPC shape. Frame-level failures drop the message (`None`) with
//! one WARN record; only per-tool argument validation surfaces an error to
//! the client.
//!
//! Depth convention: the root value counts as depth 1.

use std::collections::HashMap;

use jsonschema::Validator;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::McpError;
use crate::jsonrpc::{Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Maximum frame size in bytes (10 MiB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum nesting depth; the root counts as depth 1.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Maximum elements in any array.
pub const MAX_ARRAY_LENGTH: usize = 10_000;

/// Maximum keys in any object.
pub const MAX_OBJECT_KEYS: usize = 10_000;

/// Maximum characters in any string value.
pub const MAX_STRING_LENGTH: usize = 65_536;

/// Maximum method-name length.
pub const MAX_METHOD_LENGTH: usize = 100;

/// A compiled tool schema failed to register.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema document itself does not compile.
    #[error("schema for tool '{tool}' does not compile: {reason}")]
    Compile {
        /// Tool name.
        tool: String,
        /// Compiler diagnostic.
        reason: String,
    },
    /// Two registrations under one name.
    #[error("duplicate schema registration for tool '{0}'")]
    Duplicate(String),
}

/// Validates raw frames and per-tool arguments.
pub struct FrameValidator {
    method_pattern: Regex,
    tool_schemas: HashMap<String, Validator>,
}

impl std::fmt::Debug for FrameValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameValidator")
            .field("tool_schemas", &self.tool_schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for FrameValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameValidator {
    /// Validator with no tool schemas registered yet.
    pub fn new() -> Self {
        Self {
            method_pattern: Regex::new(r"^[A-Za-z_][A-Za-z0-9_./]*$")
                .expect("static method pattern compiles"),
            tool_schemas: HashMap::new(),
        }
    }

    /// Compile and register the parameter schema for one tool. Called once
    /// per tool at startup; duplicates are a configuration error.
    pub fn register_tool_schema(&mut self, tool: &str, schema: &Value) -> Result<(), SchemaError> {
        if self.tool_schemas.contains_key(tool) {
            return Err(SchemaError::Duplicate(tool.to_string()));
        }
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError::Compile {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;
        self.tool_schemas.insert(tool.to_string(), validator);
        Ok(())
    }

    /// Run the full frame gauntlet over raw bytes. Returns the typed frame,
    /// or `None` after logging why the message was dropped.
    pub fn validate_frame(&self, raw: &[u8]) -> Option<Frame> {
        if raw.len() > MAX_MESSAGE_SIZE {
            warn!(size = raw.len(), limit = MAX_MESSAGE_SIZE, "frame exceeds size limit, dropped");
            return None;
        }

        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "frame is not valid UTF-8, dropped");
                return None;
            }
        };

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "frame is not valid JSON, dropped");
                return None;
            }
        };

        let depth = nesting_depth(&value);
        if depth > MAX_NESTING_DEPTH {
            warn!(depth, limit = MAX_NESTING_DEPTH, "frame exceeds nesting depth, dropped");
            return None;
        }

        if let Err(reason) = check_container_bounds(&value) {
            warn!(%reason, "frame exceeds container bounds, dropped");
            return None;
        }

        self.classify(&value)
    }

    /// Validate `tools/call` arguments against the registered schema for
    /// `tool`. Unknown tools pass here; the dispatcher owns that error.
    pub fn validate_tool_arguments(&self, tool: &str, arguments: &Value) -> Result<(), McpError> {
        let Some(validator) = self.tool_schemas.get(tool) else {
            return Ok(());
        };
        if let Err(err) = validator.validate(arguments) {
            let pointer = err.instance_path().to_string();
            return Err(McpError::invalid_params(
                format!("invalid arguments for '{tool}': {err}"),
                pointer,
            ));
        }
        Ok(())
    }

    /// Whether a schema is registered for `tool`.
    pub fn has_tool_schema(&self, tool: &str) -> bool {
        self.tool_schemas.contains_key(tool)
    }

    /// Discriminate the JSON-RPC shape and deserialize the matching type.
    fn classify(&self, value: &Value) -> Option<Frame> {
        let Some(object) = value.as_object() else {
            warn!("frame is not a JSON object, dropped");
            return None;
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(crate::jsonrpc::JSONRPC_VERSION) {
            warn!("frame has missing or wrong jsonrpc version, dropped");
            return None;
        }

        let has_id = object.contains_key("id");
        let has_method = object.contains_key("method");
        let has_outcome = object.contains_key("result") || object.contains_key("error");

        if has_method && !self.valid_method(object.get("method")) {
            warn!("frame has malformed method name, dropped");
            return None;
        }

        let frame = if has_id && has_method {
            serde_json::from_value::<JsonRpcRequest>(value.clone())
                .ok()
                .map(Frame::Request)
        } else if has_id && has_outcome {
            serde_json::from_value::<JsonRpcResponse>(value.clone())
                .ok()
                .map(Frame::Response)
        } else if has_method {
            serde_json::from_value::<JsonRpcNotification>(value.clone())
                .ok()
                .map(Frame::Notification)
        } else {
            None
        };

        if frame.is_none() {
            warn!("frame does not match any JSON-RPC shape, dropped");
        }
        frame
    }

    fn valid_method(&self, method: Option<&Value>) -> bool {
        method
            .and_then(Value::as_str)
            .is_some_and(|m| m.len() <= MAX_METHOD_LENGTH && self.method_pattern.is_match(m))
    }
}

/// Maximum nesting depth of a JSON value; the root counts as depth 1.
pub fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => {
            1 + map
                .values()
                .map(nesting_depth)
                .max()
                .unwrap_or(0)
        }
        Value::Array(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        _ => 1,
    }
}

fn check_container_bounds(value: &Value) -> Result<(), String> {
    match value {
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_LENGTH {
                return Err(format!("array length {} exceeds {MAX_ARRAY_LENGTH}", items.len()));
            }
            items.iter().try_for_each(check_container_bounds)
        }
        Value::Object(map) => {
            if map.len() > MAX_OBJECT_KEYS {
                return Err(format!("object key count {} exceeds {MAX_OBJECT_KEYS}", map.len()));
            }
            map.values().try_for_each(check_container_bounds)
        }
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_LENGTH {
                Err(format!("string length exceeds {MAX_STRING_LENGTH}"))
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
