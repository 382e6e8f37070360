//! The DShield API client.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use dshield_mcp_core::{BackoffPolicy, BreakerState, CircuitBreaker, SlidingWindow};

/// A benign, well-known address used for health probes.
pub const PROBE_IP: &str = "8.8.8.8";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct DshieldConfig {
    /// Base URL of the DShield API.
    pub api_url: String,
    /// API key sent on every request; resolved from the secret store at
    /// startup.
    pub api_key: Option<String>,
    /// Per-IP cache TTL.
    pub cache_ttl: Duration,
    /// Host-scoped request budget per minute.
    pub rate_limit_rpm: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Largest accepted enrichment batch.
    pub batch_limit: usize,
    /// Optional proxy URL.
    pub proxy: Option<String>,
}

impl Default for DshieldConfig {
    fn default() -> Self {
        Self {
            api_url: "https://dshield.org/api".to_string(),
            api_key: None,
            cache_ttl: Duration::from_secs(300),
            rate_limit_rpm: 60,
            request_timeout: Duration::from_secs(10),
            batch_limit: 100,
            proxy: None,
        }
    }
}

/// Client errors. The breaker path never surfaces one of these; it degrades
/// to a no-data record instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DshieldError {
    /// Transport failure after retries.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("backend returned status {0}")]
    Status(u16),
    /// 2xx with an unusable body.
    #[error("unexpected response body: {0}")]
    BadResponse(String),
    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A batch was larger than the configured limit.
    #[error("batch of {got} exceeds the limit of {limit}")]
    BatchTooLarge {
        /// Requested batch size.
        got: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl DshieldError {
    /// Whether the failure is transient enough to retry inside the client.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => *status >= 500,
            _ => false,
        }
    }
}

/// Enrichment record for one IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpEnrichment {
    /// The queried address.
    pub ip_address: String,
    /// Normalized reputation score in `[0, 100]`; `None` when DShield has
    /// no data or the circuit is open.
    pub reputation_score: Option<f64>,
    /// Reported attack count.
    pub attack_count: Option<u64>,
    /// Distinct targets reported.
    pub target_count: Option<u64>,
    /// First report date.
    pub first_seen: Option<String>,
    /// Most recent report date.
    pub last_seen: Option<String>,
    /// Country of the registering network.
    pub country: Option<String>,
    /// AS name of the registering network.
    pub as_name: Option<String>,
    /// Where this record came from: `dshield` or `circuit_open`.
    pub source: String,
}

impl IpEnrichment {
    /// The degraded record returned while the circuit is open.
    pub fn circuit_open(ip: &str) -> Self {
        Self {
            ip_address: ip.to_string(),
            reputation_score: None,
            attack_count: None,
            target_count: None,
            first_seen: None,
            last_seen: None,
            country: None,
            as_name: None,
            source: "circuit_open".to_string(),
        }
    }

    fn from_api(ip: &str, body: &Value) -> Self {
        let record = body.get("ip").unwrap_or(body);
        let attacks = record.get("attacks").and_then(Value::as_u64);
        let count = record.get("count").and_then(Value::as_u64);
        Self {
            ip_address: ip.to_string(),
            reputation_score: attacks.map(score_from_attacks),
            attack_count: attacks,
            target_count: count,
            first_seen: string_field(record, "mindate"),
            last_seen: string_field(record, "maxdate"),
            country: string_field(record, "country"),
            as_name: string_field(record, "asname"),
            source: "dshield".to_string(),
        }
    }
}

fn string_field(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Saturating log-style mapping of raw attack counts onto `[0, 100]`.
fn score_from_attacks(attacks: u64) -> f64 {
    if attacks == 0 {
        return 0.0;
    }
    (((attacks as f64).log10() + 1.0) * 20.0).min(100.0)
}

/// The shared DShield client.
pub struct DshieldClient {
    config: DshieldConfig,
    http: reqwest::Client,
    cache: Cache<String, Arc<IpEnrichment>>,
    limiter: SlidingWindow,
    breaker: Arc<CircuitBreaker>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for DshieldClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DshieldClient")
            .field("api_url", &self.config.api_url)
            .field("cached_ips", &self.cache.entry_count())
            .field("breaker", &self.breaker.state().as_str())
            .finish()
    }
}

impl DshieldClient {
    /// Build a client; fails only on unusable configuration.
    pub fn new(config: DshieldConfig) -> Result<Self, DshieldError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| DshieldError::Configuration(format!("invalid proxy: {e}")))?,
            );
        }
        let http = builder
            .build()
            .map_err(|e| DshieldError::Configuration(e.to_string()))?;

        Ok(Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(config.cache_ttl)
                .build(),
            limiter: SlidingWindow::per_minute(config.rate_limit_rpm),
            breaker: Arc::new(CircuitBreaker::new("dshield")),
            backoff: BackoffPolicy::default(),
            http,
            config,
        })
    }

    /// The breaker shared with the feature manager.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Current breaker state, for health reporting.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Configured batch limit.
    pub fn batch_limit(&self) -> usize {
        self.config.batch_limit
    }

    /// Enrich one IP. Concurrent lookups for the same address coalesce into
    /// one upstream call; results are memoized for the configured TTL. While
    /// the circuit is open this returns a no-data record rather than failing.
    pub async fn enrich_ip(&self, ip: &str) -> Result<Arc<IpEnrichment>, DshieldError> {
        let ip_owned = ip.to_string();
        if let Some(cached) = self.cache.get(&ip_owned).await {
            return Ok(cached);
        }

        if !self.breaker.allow_request() {
            debug!(ip, "circuit open, returning degraded enrichment");
            return Ok(Arc::new(IpEnrichment::circuit_open(ip)));
        }

        self.cache
            .try_get_with(ip_owned.clone(), async {
                self.fetch(&ip_owned).await.map(Arc::new)
            })
            .await
            .map_err(|shared: Arc<DshieldError>| (*shared).clone())
    }

    /// Enrich a batch of IPs sequentially under the host rate limit.
    pub async fn enrich_batch(
        &self,
        ips: &[String],
    ) -> Result<Vec<Arc<IpEnrichment>>, DshieldError> {
        if ips.len() > self.config.batch_limit {
            return Err(DshieldError::BatchTooLarge {
                got: ips.len(),
                limit: self.config.batch_limit,
            });
        }
        let mut out = Vec::with_capacity(ips.len());
        for ip in ips {
            out.push(self.enrich_ip(ip).await?);
        }
        Ok(out)
    }

    /// Probe the API with a benign address. Drives the feature manager.
    pub async fn health_probe(&self) -> Result<(), DshieldError> {
        self.fetch(PROBE_IP).await.map(|_| ())
    }

    async fn fetch(&self, ip: &str) -> Result<IpEnrichment, DshieldError> {
        self.throttle().await;

        let url = format!("{}/ip/{ip}?json", self.config.api_url.trim_end_matches('/'));
        let result = self
            .backoff
            .run_if(DshieldError::is_transient, |attempt| {
                let url = url.clone();
                async move {
                    if attempt > 1 {
                        debug!(%url, attempt, "retrying DShield request");
                    }
                    let mut request = self.http.get(&url);
                    if let Some(key) = &self.config.api_key {
                        request = request.header("X-API-Key", key);
                    }
                    let result = async {
                        let response = request
                            .send()
                            .await
                            .map_err(|e| DshieldError::Transport(e.to_string()))?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(DshieldError::Status(status.as_u16()));
                        }
                        response
                            .json::<Value>()
                            .await
                            .map_err(|e| DshieldError::BadResponse(e.to_string()))
                    }
                    .await;
                    // One attempt, one breaker observation.
                    match &result {
                        Ok(_) => self.breaker.record_success(),
                        Err(_) => self.breaker.record_failure(),
                    }
                    result
                }
            })
            .await;

        match result {
            Ok(body) => Ok(IpEnrichment::from_api(ip, &body)),
            Err(err) => {
                warn!(ip, %err, "DShield enrichment failed");
                Err(err)
            }
        }
    }

    /// Wait for the host-scoped window to admit one request.
    async fn throttle(&self) {
        loop {
            if self.limiter.try_acquire() {
                return;
            }
            let wait = self.limiter.wait_time().max(Duration::from_millis(10));
            info!(wait_ms = wait.as_millis() as u64, "DShield rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_score_mapping_is_monotonic_and_bounded() {
        assert_eq!(score_from_attacks(0), 0.0);
        assert!(score_from_attacks(1) < score_from_attacks(100));
        assert!(score_from_attacks(100) < score_from_attacks(1_000_000));
        assert!(score_from_attacks(u64::MAX) <= 100.0);
    }

    #[test]
    fn test_circuit_open_record_shape() {
        let record = IpEnrichment::circuit_open("192.0.2.1");
        assert_eq!(record.ip_address, "192.0.2.1");
        assert_eq!(record.reputation_score, None);
        assert_eq!(record.source, "circuit_open");
    }

    #[test]
    fn test_from_api_reads_nested_record() {
        let body = serde_json::json!({
            "ip": {
                "number": "192.0.2.1",
                "attacks": 42,
                "count": 512,
                "country": "US",
                "asname": "EXAMPLE-AS",
                "mindate": "2024-01-01",
                "maxdate": "2024-02-01",
            }
        });
        let record = IpEnrichment::from_api("192.0.2.1", &body);
        assert_eq!(record.attack_count, Some(42));
        assert_eq!(record.target_count, Some(512));
        assert_eq!(record.country.as_deref(), Some("US"));
        assert_eq!(record.as_name.as_deref(), Some("EXAMPLE-AS"));
        assert_eq!(record.source, "dshield");
        assert!(record.reputation_score.expect("score") > 0.0);
    }
}
