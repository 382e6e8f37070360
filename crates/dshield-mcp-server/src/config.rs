//! Environment-driven configuration with secret-URI resolution.
//!
//! Every value may be a literal or an opaque secret URI; URIs are handed to
//! the injected resolver at load time, and resolution failures fall back to
//! the literal with a logged warning.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use dshield_mcp_dshield::DshieldConfig;
use dshield_mcp_elastic::ElasticsearchConfig;

/// URI scheme prefixes that mark a value as a secret reference.
pub const SECRET_SCHEMES: [&str; 2] = ["op://", "secret://"];

/// Resolves opaque secret URIs into their values.
pub trait SecretResolver: Send + Sync {
    /// Resolve a URI; `None` when the secret cannot be produced.
    fn resolve(&self, uri: &str) -> Option<String>;
}

/// Resolver that never resolves anything; secrets stay literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSecretResolver;

impl SecretResolver for NoopSecretResolver {
    fn resolve(&self, _uri: &str) -> Option<String> {
        None
    }
}

/// Configuration errors; all fatal at startup (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Environment key.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable output.
    Pretty,
}

/// The full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Elasticsearch endpoint and credentials.
    pub elasticsearch_url: String,
    /// Basic-auth username.
    pub elasticsearch_username: Option<String>,
    /// Basic-auth password.
    pub elasticsearch_password: Option<String>,
    /// TLS verification toggle.
    pub elasticsearch_verify_ssl: bool,
    /// Optional CA bundle.
    pub elasticsearch_ca_certs: Option<PathBuf>,

    /// DShield API endpoint.
    pub dshield_api_url: String,
    /// DShield API key.
    pub dshield_api_key: Option<String>,

    /// TCP bind host.
    pub server_host: String,
    /// TCP bind port.
    pub server_port: u16,
    /// Debug logging toggle.
    pub server_debug: bool,

    /// Per-API-key sustained rate.
    pub rate_limit_rpm: u32,
    /// Page-size ceiling (≤ 1000).
    pub max_query_results: usize,
    /// Per-query timeout.
    pub query_timeout: Duration,
    /// Default trailing window for queries.
    pub default_time_range_hours: u32,
    /// Largest accepted IP enrichment batch.
    pub ip_batch_limit: usize,
    /// Cache TTL for query results and IP enrichment.
    pub cache_ttl: Duration,

    /// Outbound HTTP proxy.
    pub http_proxy: Option<String>,
    /// Outbound HTTPS proxy.
    pub https_proxy: Option<String>,
    /// Proxy bypass list.
    pub no_proxy: Option<String>,

    /// Log filter level.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            elasticsearch_url: "http://localhost:9200".to_string(),
            elasticsearch_username: None,
            elasticsearch_password: None,
            elasticsearch_verify_ssl: true,
            elasticsearch_ca_certs: None,
            dshield_api_url: "https://dshield.org/api".to_string(),
            dshield_api_key: None,
            server_host: "localhost".to_string(),
            server_port: 8000,
            server_debug: false,
            rate_limit_rpm: 60,
            max_query_results: 1000,
            query_timeout: Duration::from_secs(30),
            default_time_range_hours: 24,
            ip_batch_limit: 100,
            cache_ttl: Duration::from_secs(300),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServerConfig {
    /// Load from process environment variables.
    pub fn from_env(resolver: &dyn SecretResolver) -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok(), resolver)
    }

    /// Load from an arbitrary key-value lookup. The seam the tests use.
    pub fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map(|v| resolve_value(key, v, resolver))
        };

        if let Some(v) = get("ELASTICSEARCH_URL") {
            config.elasticsearch_url = v;
        }
        config.elasticsearch_username = get("ELASTICSEARCH_USERNAME");
        config.elasticsearch_password = get("ELASTICSEARCH_PASSWORD");
        if let Some(v) = get("ELASTICSEARCH_VERIFY_SSL") {
            config.elasticsearch_verify_ssl = parse_bool("ELASTICSEARCH_VERIFY_SSL", &v)?;
        }
        config.elasticsearch_ca_certs = get("ELASTICSEARCH_CA_CERTS").map(PathBuf::from);

        if let Some(v) = get("DSHIELD_API_URL") {
            config.dshield_api_url = v;
        }
        config.dshield_api_key = get("DSHIELD_API_KEY");

        if let Some(v) = get("MCP_SERVER_HOST") {
            config.server_host = v;
        }
        if let Some(v) = get("MCP_SERVER_PORT") {
            config.server_port = parse_number("MCP_SERVER_PORT", &v)?;
        }
        if let Some(v) = get("MCP_SERVER_DEBUG") {
            config.server_debug = parse_bool("MCP_SERVER_DEBUG", &v)?;
        }

        if let Some(v) = get("RATE_LIMIT_REQUESTS_PER_MINUTE") {
            config.rate_limit_rpm = parse_number("RATE_LIMIT_REQUESTS_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("MAX_QUERY_RESULTS") {
            config.max_query_results = parse_number("MAX_QUERY_RESULTS", &v)?;
        }
        if let Some(v) = get("QUERY_TIMEOUT_SECONDS") {
            config.query_timeout =
                Duration::from_secs(parse_number("QUERY_TIMEOUT_SECONDS", &v)?);
        }
        if let Some(v) = get("DEFAULT_TIME_RANGE_HOURS") {
            config.default_time_range_hours = parse_number("DEFAULT_TIME_RANGE_HOURS", &v)?;
        }
        if let Some(v) = get("MAX_IP_ENRICHMENT_BATCH_SIZE") {
            config.ip_batch_limit = parse_number("MAX_IP_ENRICHMENT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("CACHE_TTL_SECONDS") {
            config.cache_ttl = Duration::from_secs(parse_number("CACHE_TTL_SECONDS", &v)?);
        }

        config.http_proxy = get("HTTP_PROXY");
        config.https_proxy = get("HTTPS_PROXY");
        config.no_proxy = get("NO_PROXY");

        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            config.log_format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::invalid(
                        "LOG_FORMAT",
                        format!("expected json or pretty, got '{other}'"),
                    ));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_query_results == 0 || self.max_query_results > 1000 {
            return Err(ConfigError::invalid(
                "MAX_QUERY_RESULTS",
                "must be between 1 and 1000",
            ));
        }
        if self.rate_limit_rpm == 0 {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_REQUESTS_PER_MINUTE",
                "must be at least 1",
            ));
        }
        if self.default_time_range_hours == 0 {
            return Err(ConfigError::invalid(
                "DEFAULT_TIME_RANGE_HOURS",
                "must be at least 1",
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "QUERY_TIMEOUT_SECONDS",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Derived Elasticsearch client configuration.
    pub fn elasticsearch_config(&self) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: self.elasticsearch_url.clone(),
            username: self.elasticsearch_username.clone(),
            password: self.elasticsearch_password.clone(),
            verify_ssl: self.elasticsearch_verify_ssl,
            ca_certs: self.elasticsearch_ca_certs.clone(),
            request_timeout: self.query_timeout,
            max_page_size: self.max_query_results,
            cache_ttl: self.cache_ttl,
            proxy: self.https_proxy.clone().or_else(|| self.http_proxy.clone()),
            ..ElasticsearchConfig::default()
        }
    }

    /// Derived DShield client configuration.
    pub fn dshield_config(&self) -> DshieldConfig {
        DshieldConfig {
            api_url: self.dshield_api_url.clone(),
            api_key: self.dshield_api_key.clone(),
            cache_ttl: self.cache_ttl,
            batch_limit: self.ip_batch_limit,
            proxy: self.https_proxy.clone().or_else(|| self.http_proxy.clone()),
            ..DshieldConfig::default()
        }
    }
}

/// Replace a secret URI with its resolution; fall back to the literal.
fn resolve_value(key: &str, value: String, resolver: &dyn SecretResolver) -> String {
    if !SECRET_SCHEMES.iter().any(|s| value.starts_with(s)) {
        return value;
    }
    match resolver.resolve(&value) {
        Some(resolved) => {
            info!(key, "resolved secret reference");
            resolved
        }
        None => {
            warn!(key, "secret reference did not resolve, using literal value");
            value
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("expected boolean, got '{other}'"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(key, format!("expected number, got '{value}'")))
}
