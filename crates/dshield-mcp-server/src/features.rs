//! Feature availability tracking.
//!
//! Dependencies are probed at startup and re-probed on health checks; an
//! open circuit breaker overrides a healthy probe for its backend. Tool
//! exposure and call gating both read through here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use dshield_mcp_core::{CircuitBreaker, FeatureSet, FeatureState, FeatureTag};
use dshield_mcp_dshield::DshieldClient;
use dshield_mcp_elastic::ElasticsearchClient;
use dshield_mcp_protocol::McpError;

/// Probe timeout applied to each dependency check.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks availability of every feature tag.
#[derive(Debug)]
pub struct FeatureManager {
    states: DashMap<FeatureTag, FeatureState>,
    es_breaker: Arc<CircuitBreaker>,
    dshield_breaker: Arc<CircuitBreaker>,
}

impl FeatureManager {
    /// Manager with every feature unavailable until the first probe.
    pub fn new(es_breaker: Arc<CircuitBreaker>, dshield_breaker: Arc<CircuitBreaker>) -> Self {
        let states = DashMap::new();
        for tag in FeatureTag::ALL {
            states.insert(tag, FeatureState::unavailable("not probed yet"));
        }
        Self {
            states,
            es_breaker,
            dshield_breaker,
        }
    }

    /// Record a probe outcome.
    pub fn set(&self, tag: FeatureTag, state: FeatureState) {
        match &state {
            FeatureState::Available => info!(feature = %tag, "feature available"),
            FeatureState::Unavailable { reason } => {
                warn!(feature = %tag, reason, "feature unavailable");
            }
        }
        self.states.insert(tag, state);
    }

    /// Current state of one feature, folding in the backend breakers.
    pub fn state(&self, tag: FeatureTag) -> FeatureState {
        let breaker_open = match tag {
            FeatureTag::Elasticsearch => self.es_breaker.is_open(),
            FeatureTag::Dshield | FeatureTag::ThreatIntel => self.dshield_breaker.is_open(),
            FeatureTag::Latex => false,
        };
        if breaker_open {
            return FeatureState::unavailable("circuit breaker open");
        }
        self.states
            .get(&tag)
            .map(|s| s.clone())
            .unwrap_or_else(|| FeatureState::unavailable("unknown feature"))
    }

    /// Whether one feature is usable right now.
    pub fn is_available(&self, tag: FeatureTag) -> bool {
        self.state(tag).is_available()
    }

    /// Check a tool's full requirement set; the first missing feature
    /// becomes the error.
    pub fn require_all(&self, required: &FeatureSet) -> Result<(), McpError> {
        for tag in required {
            if let FeatureState::Unavailable { reason } = self.state(*tag) {
                return Err(McpError::feature_unavailable(tag.as_str(), reason));
            }
        }
        Ok(())
    }

    /// Snapshot of every feature, for health reporting.
    pub fn snapshot(&self) -> BTreeMap<FeatureTag, FeatureState> {
        FeatureTag::ALL
            .into_iter()
            .map(|tag| (tag, self.state(tag)))
            .collect()
    }

    /// Probe every dependency and record the outcomes. Called at startup
    /// and from the health tool.
    pub async fn probe_all(&self, elastic: &ElasticsearchClient, dshield: &DshieldClient) {
        let es_state = match tokio::time::timeout(PROBE_TIMEOUT, elastic.connect()).await {
            Ok(Ok(())) => FeatureState::Available,
            Ok(Err(err)) => FeatureState::unavailable(err.to_string()),
            Err(_) => FeatureState::unavailable("probe timed out"),
        };
        self.set(FeatureTag::Elasticsearch, es_state);

        let dshield_state = match tokio::time::timeout(PROBE_TIMEOUT, dshield.health_probe()).await
        {
            Ok(Ok(())) => FeatureState::Available,
            Ok(Err(err)) => FeatureState::unavailable(err.to_string()),
            Err(_) => FeatureState::unavailable("probe timed out"),
        };
        self.set(FeatureTag::ThreatIntel, dshield_state.clone());
        self.set(FeatureTag::Dshield, dshield_state);

        self.set(FeatureTag::Latex, probe_latex());
    }
}

/// Check for a usable LaTeX toolchain on PATH.
fn probe_latex() -> FeatureState {
    for binary in ["latexmk", "pdflatex"] {
        if find_in_path(binary) {
            return FeatureState::Available;
        }
    }
    FeatureState::unavailable("no latexmk or pdflatex on PATH")
}

fn find_in_path(binary: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(binary).is_file())
}
