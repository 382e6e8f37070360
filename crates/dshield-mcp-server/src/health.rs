//! Health snapshot assembly.

use serde_json::{Value, json};

use dshield_mcp_core::FeatureState;

use crate::context::ServerContext;

/// Build the `get_health_status` payload.
pub fn snapshot(ctx: &ServerContext, detailed: bool) -> Value {
    let features = ctx.features.snapshot();
    let degraded: Vec<String> = features
        .iter()
        .filter_map(|(tag, state)| match state {
            FeatureState::Available => None,
            FeatureState::Unavailable { .. } => Some(tag.as_str().to_string()),
        })
        .collect();

    let feature_states: Value = features
        .iter()
        .map(|(tag, state)| (tag.as_str().to_string(), json!(state)))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    let mut payload = json!({
        "status": if degraded.is_empty() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
        "features": feature_states,
        "degraded_features": degraded,
        "breakers": {
            "elasticsearch": ctx.elastic.breaker_state().as_str(),
            "dshield": ctx.dshield.breaker_state().as_str(),
        },
        "rate_limits": {
            "global_window_count": ctx.rate_limits.global.current_count(),
        },
    });

    if detailed {
        payload["metrics"] = ctx.metrics.snapshot();
        payload["campaigns_tracked"] = json!(ctx.campaigns.len());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_reports_degraded_before_probes() {
        let ctx = ServerContext::new(ServerConfig::default()).expect("context builds");
        let payload = snapshot(&ctx, false);
        assert_eq!(payload["status"], "degraded");
        assert!(payload.get("metrics").is_none(), "metrics only when detailed");
        assert_eq!(payload["breakers"]["elasticsearch"], "closed");
    }

    #[test]
    fn test_detailed_snapshot_includes_metrics() {
        let ctx = ServerContext::new(ServerConfig::default()).expect("context builds");
        ctx.metrics.record_request();
        let payload = snapshot(&ctx, true);
        assert_eq!(payload["metrics"]["requests_total"], 1);
        assert_eq!(payload["campaigns_tracked"], 0);
    }
}
