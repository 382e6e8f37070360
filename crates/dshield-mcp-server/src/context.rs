//! The server context.
//!
//! One value owning every shared component, constructed once at startup and
//! passed explicitly to whoever needs it. There is no module-level mutable
//! state anywhere in the server; this struct is the only composition point,
//! which also keeps the server, dispatcher, and registry free of
//! back-references to each other.

use std::sync::Arc;
use std::time::Instant;

use dshield_mcp_dshield::DshieldClient;
use dshield_mcp_elastic::ElasticsearchClient;

use crate::campaign::CampaignStore;
use crate::config::ServerConfig;
use crate::features::FeatureManager;
use crate::metrics::ServerMetrics;
use crate::rate_limit::RateLimitStack;
use crate::registry::{RegistryError, ToolRegistry};
use crate::report::{LatexRenderer, ReportRenderer};

/// Everything the handlers share.
pub struct ServerContext {
    /// Startup configuration.
    pub config: ServerConfig,
    /// The immutable tool table.
    pub registry: ToolRegistry,
    /// Feature availability.
    pub features: FeatureManager,
    /// Hierarchical rate limiter.
    pub rate_limits: RateLimitStack,
    /// Server counters.
    pub metrics: ServerMetrics,
    /// Analyzed campaigns.
    pub campaigns: CampaignStore,
    /// Shared Elasticsearch client.
    pub elastic: Arc<ElasticsearchClient>,
    /// Shared DShield client.
    pub dshield: Arc<DshieldClient>,
    /// Report renderer.
    pub renderer: Arc<dyn ReportRenderer>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("tools", &self.registry.all().count())
            .field("campaigns", &self.campaigns.len())
            .finish()
    }
}

/// Context construction errors.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Tool registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A backend client rejected its configuration.
    #[error("client configuration error: {0}")]
    Client(String),
}

impl ServerContext {
    /// Build the full context from configuration with the default renderer.
    pub fn new(config: ServerConfig) -> Result<Self, ContextError> {
        let elastic = Arc::new(ElasticsearchClient::new(config.elasticsearch_config()));
        let dshield = Arc::new(
            DshieldClient::new(config.dshield_config())
                .map_err(|e| ContextError::Client(e.to_string()))?,
        );
        Self::with_clients(config, elastic, dshield, Arc::new(LatexRenderer::new(None)))
    }

    /// Build the context around preconstructed clients. The seam used by
    /// tests and by the binary when it wants a custom renderer.
    pub fn with_clients(
        config: ServerConfig,
        elastic: Arc<ElasticsearchClient>,
        dshield: Arc<DshieldClient>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Result<Self, ContextError> {
        let registry = ToolRegistry::with_builtin_tools()?;
        let features = FeatureManager::new(elastic.breaker(), dshield.breaker());
        let rate_limits = RateLimitStack::new(config.rate_limit_rpm);

        Ok(Self {
            registry,
            features,
            rate_limits,
            metrics: ServerMetrics::new(),
            campaigns: CampaignStore::new(),
            elastic,
            dshield,
            renderer,
            started_at: Instant::now(),
            config,
        })
    }
}
