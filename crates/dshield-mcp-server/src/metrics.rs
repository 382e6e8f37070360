//! Lock-free server counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::{Value, json};

use dshield_mcp_protocol::McpErrorKind;

/// Request, tool, and error counters. All updates are relaxed atomics; the
/// numbers feed health reporting, nothing synchronizes on them.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    requests_total: AtomicU64,
    notifications_total: AtomicU64,
    tool_calls: DashMap<String, AtomicU64>,
    errors: DashMap<&'static str, AtomicU64>,
}

impl ServerMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one inbound request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inbound notification.
    pub fn record_notification(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one call of a named tool.
    pub fn record_tool_call(&self, tool: &str) {
        self.tool_calls
            .entry(tool.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count one surfaced error by taxonomy kind.
    pub fn record_error(&self, kind: McpErrorKind) {
        self.errors
            .entry(kind.as_str())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Total requests so far.
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Snapshot for health reporting: every error kind appears, zeroed or
    /// not, so dashboards see a stable shape.
    pub fn snapshot(&self) -> Value {
        let mut errors = BTreeMap::new();
        for kind in McpErrorKind::ALL {
            errors.insert(kind.as_str(), 0u64);
        }
        for entry in self.errors.iter() {
            errors.insert(*entry.key(), entry.value().load(Ordering::Relaxed));
        }

        let mut tools = BTreeMap::new();
        for entry in self.tool_calls.iter() {
            tools.insert(entry.key().clone(), entry.value().load(Ordering::Relaxed));
        }

        json!({
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "notifications_total": self.notifications_total.load(Ordering::Relaxed),
            "tool_calls": tools,
            "errors": errors,
        })
    }
}
