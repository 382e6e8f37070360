//! The Elasticsearch REST client.
//!
//! Connection lifecycle, index discovery, paged queries, and aggregation
//! passthrough. All request paths share one circuit breaker and one jittered
//! retry budget; `close` cancels whatever is in flight.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dshield_mcp_core::{
    BackoffPolicy, BreakerState, CircuitBreaker, Event, PerformanceMetrics, QueryComplexity,
};

use crate::cache::{CachedPage, QueryCache};
use crate::cursor::Cursor;
use crate::error::{EsError, EsResult};
use crate::pagination::{PageInfo, PageSelector, check_deep_page};
use crate::query::QuerySpec;

/// Hard ceiling on any page size, independent of configuration.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster.
    pub url: String,
    /// Basic-auth username.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
    /// Optional CA bundle path.
    pub ca_certs: Option<PathBuf>,
    /// Index pattern holding DShield events.
    pub index_pattern: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Upper bound a caller's page size is clamped to.
    pub max_page_size: usize,
    /// Result-cache TTL.
    pub cache_ttl: Duration,
    /// Optional proxy URL applied to all requests.
    pub proxy: Option<String>,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            verify_ssl: true,
            ca_certs: None,
            index_pattern: "dshield-*".to_string(),
            request_timeout: Duration::from_secs(30),
            max_page_size: MAX_PAGE_SIZE,
            cache_ttl: Duration::from_secs(300),
            proxy: None,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage {
    /// Events, strictly ordered by the query sort.
    pub events: Arc<Vec<Event>>,
    /// Total hits matching the query.
    pub total_hits: u64,
    /// Page bookkeeping (page-number mode only).
    pub page_info: Option<PageInfo>,
    /// Cursor to the next page, when more events exist.
    pub cursor: Option<String>,
    /// Cost observability for this call.
    pub metrics: PerformanceMetrics,
}

/// Aggregation passthrough result.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    /// Raw aggregation tree from the backend.
    pub aggregations: Value,
    /// Cost observability for this call.
    pub metrics: PerformanceMetrics,
}

/// Raw page used by the streaming layer.
#[derive(Debug)]
pub(crate) struct RawPage {
    pub events: Vec<Event>,
    pub total_hits: u64,
    pub shards: usize,
}

/// The shared Elasticsearch client.
#[derive(Debug)]
pub struct ElasticsearchClient {
    config: ElasticsearchConfig,
    http: Mutex<Option<reqwest::Client>>,
    cancel: Mutex<CancellationToken>,
    breaker: Arc<CircuitBreaker>,
    backoff: BackoffPolicy,
    cache: QueryCache,
}

impl ElasticsearchClient {
    /// Build an unconnected client.
    pub fn new(config: ElasticsearchConfig) -> Self {
        let cache = QueryCache::new(256, config.cache_ttl);
        Self {
            config,
            http: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            breaker: Arc::new(CircuitBreaker::new("elasticsearch")),
            backoff: BackoffPolicy::default(),
            cache,
        }
    }

    /// The breaker shared with the feature manager.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Connect and verify the cluster answers. Idempotent.
    pub async fn connect(&self) -> EsResult<()> {
        {
            let mut http = self.http.lock();
            if http.is_none() {
                *http = Some(self.build_http()?);
            }
        }
        let info = self.send_json(reqwest::Method::GET, "", None).await?;
        info!(
            cluster = info.get("cluster_name").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "connected to Elasticsearch"
        );
        Ok(())
    }

    /// Cancel in-flight requests and release the connection pool. A later
    /// `connect` starts fresh.
    pub fn close(&self) {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
        *self.http.lock() = None;
        self.cache.invalidate_all();
        debug!("Elasticsearch client closed");
    }

    /// Discover event indices matching the configured pattern, newest first.
    pub async fn discover_indices(&self) -> EsResult<Vec<String>> {
        let path = format!("_cat/indices/{}?format=json&h=index", self.config.index_pattern);
        let body = self.send_json(reqwest::Method::GET, &path, None).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| EsError::BadResponse("index listing is not an array".to_string()))?;
        let mut indices: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("index").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        indices.sort_by(|a, b| b.cmp(a));
        Ok(indices)
    }

    /// Run a paged event query in either pagination mode.
    pub async fn query_events(
        &self,
        spec: &QuerySpec,
        selector: &PageSelector,
    ) -> EsResult<QueryPage> {
        let started = Instant::now();
        let indices = self.discover_indices().await?;
        if indices.is_empty() {
            return Ok(QueryPage {
                events: Arc::new(Vec::new()),
                total_hits: 0,
                page_info: Some(PageInfo::compute(1, spec.page_size.max(1), 0, 0)),
                cursor: None,
                metrics: PerformanceMetrics::empty(elapsed_ms(started), 0),
            });
        }

        let fingerprint = spec.fingerprint(&indices);
        let (effective_size, clamped) = self.clamp_page_size(spec.page_size);

        let (page_address, after) = match selector {
            PageSelector::Number(n) => {
                check_deep_page(*n, effective_size)?;
                (format!("page:{n}"), None)
            }
            PageSelector::Cursor(token) => {
                // Fail fast on foreign cursors before spending a query.
                let cursor = Cursor::decode_for(token, &fingerprint)?;
                (format!("cursor:{token}"), Some(cursor))
            }
        };

        let cache_key = QueryCache::key(&fingerprint, &page_address);
        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!(%fingerprint, "query served from cache");
            return Ok(QueryPage {
                events: hit.events,
                total_hits: hit.total_hits,
                page_info: hit.page_info,
                cursor: hit.cursor,
                metrics: PerformanceMetrics::cached(elapsed_ms(started)),
            });
        }

        let mut body = spec.to_search_body();
        body["size"] = json!(effective_size);
        match (&after, selector) {
            (Some(cursor), _) => {
                body["search_after"] = cursor.search_after();
            }
            (None, PageSelector::Number(n)) => {
                body["from"] = json!((n.saturating_sub(1)) * effective_size);
            }
            (None, PageSelector::Cursor(_)) => {}
        }

        let raw = self.search(&body).await?;
        let mut metrics = if raw.events.is_empty() {
            PerformanceMetrics::empty(elapsed_ms(started), indices.len())
        } else {
            PerformanceMetrics::simple(elapsed_ms(started), indices.len(), raw.total_hits)
        };
        metrics.shards_scanned = raw.shards;
        if spec.fields.is_some() {
            metrics.record_optimization("field_reduction");
        }
        if clamped {
            metrics.record_optimization("page_reduction");
        }

        let page_info = match selector {
            PageSelector::Number(n) => Some(PageInfo::compute(
                *n,
                effective_size,
                raw.total_hits,
                raw.events.len(),
            )),
            PageSelector::Cursor(_) => None,
        };

        let has_next = match &page_info {
            Some(info) => info.has_next,
            None => raw.events.len() == effective_size,
        };
        let cursor = if has_next {
            raw.events
                .last()
                .map(|last| Cursor::new(last.timestamp_ms, &last.doc_id, &fingerprint).encode())
        } else {
            None
        };

        let events = Arc::new(raw.events);
        self.cache
            .insert(
                cache_key,
                CachedPage {
                    events: Arc::clone(&events),
                    total_hits: raw.total_hits,
                    page_info: page_info.clone(),
                    cursor: cursor.clone(),
                },
            )
            .await;

        Ok(QueryPage {
            events,
            total_hits: raw.total_hits,
            page_info,
            cursor,
            metrics,
        })
    }

    /// Run an opaque aggregation specification.
    pub async fn execute_aggregation_query(
        &self,
        spec: &QuerySpec,
        aggregations: Value,
    ) -> EsResult<AggregationResult> {
        let started = Instant::now();
        let indices = self.discover_indices().await?;

        let mut body = spec.to_search_body();
        body["size"] = json!(0);
        body["aggs"] = aggregations;
        if let Some(object) = body.as_object_mut() {
            object.remove("sort");
        }

        let response = self.search_raw(&body).await?;
        let total = response["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let shards = response["_shards"]["total"].as_u64().unwrap_or(0) as usize;

        let mut metrics = PerformanceMetrics::simple(elapsed_ms(started), indices.len(), total);
        metrics.query_complexity = QueryComplexity::Aggregation;
        metrics.aggregations_used = true;
        metrics.shards_scanned = shards;

        Ok(AggregationResult {
            aggregations: response.get("aggregations").cloned().unwrap_or(json!({})),
            metrics,
        })
    }

    /// One raw page for the streaming layer, bypassing the result cache.
    pub(crate) async fn fetch_page_after(
        &self,
        spec: &QuerySpec,
        after: Option<&Cursor>,
        size: usize,
    ) -> EsResult<RawPage> {
        let mut body = spec.to_search_body();
        body["size"] = json!(size.min(self.config.max_page_size).min(MAX_PAGE_SIZE));
        if let Some(cursor) = after {
            body["search_after"] = cursor.search_after();
        }
        self.search(&body).await
    }

    /// Fingerprint for the configured pattern's current index set.
    pub async fn fingerprint_for(&self, spec: &QuerySpec) -> EsResult<String> {
        let indices = self.discover_indices().await?;
        Ok(spec.fingerprint(&indices))
    }

    /// Current breaker state, for health reporting.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn clamp_page_size(&self, requested: usize) -> (usize, bool) {
        let ceiling = self.config.max_page_size.min(MAX_PAGE_SIZE);
        let effective = requested.clamp(1, ceiling);
        (effective, effective < requested)
    }

    async fn search(&self, body: &Value) -> EsResult<RawPage> {
        let response = self.search_raw(body).await?;
        let hits = response["hits"]["hits"]
            .as_array()
            .ok_or_else(|| EsError::BadResponse("missing hits array".to_string()))?;
        let total_hits = response["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let shards = response["_shards"]["total"].as_u64().unwrap_or(0) as usize;

        let mut events = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(id) = hit.get("_id").and_then(Value::as_str) else {
                continue;
            };
            let source = hit
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            match Event::from_source(id, source) {
                Some(event) => events.push(event),
                None => warn!(doc_id = id, "document without usable @timestamp skipped"),
            }
        }
        Ok(RawPage {
            events,
            total_hits,
            shards,
        })
    }

    async fn search_raw(&self, body: &Value) -> EsResult<Value> {
        let path = format!("{}/_search", self.config.index_pattern);
        self.send_json(reqwest::Method::POST, &path, Some(body)).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> EsResult<Value> {
        if !self.breaker.allow_request() {
            return Err(EsError::CircuitOpen);
        }
        let client = self.http.lock().clone().ok_or(EsError::NotConnected)?;
        let cancel = self.cancel.lock().clone();
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);

        // Every attempt is one backend observation for the breaker; only
        // transient failures are worth a retry.
        self.backoff
            .run_if(EsError::is_transient, |attempt| {
                let client = client.clone();
                let cancel = cancel.clone();
                let url = url.clone();
                let method = method.clone();
                let body = body.cloned();
                let breaker = Arc::clone(&self.breaker);
                async move {
                    if attempt > 1 {
                        debug!(%url, attempt, "retrying Elasticsearch request");
                    }
                    let mut request = client.request(method, &url);
                    if let Some(body) = &body {
                        request = request.json(body);
                    }
                    let result = async {
                        let outcome = tokio::select! {
                            _ = cancel.cancelled() => return Err(EsError::Closed),
                            outcome = request.send() => outcome,
                        };
                        let response = outcome.map_err(|e| EsError::Transport(e.to_string()))?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(EsError::Status {
                                status: status.as_u16(),
                            });
                        }
                        response
                            .json::<Value>()
                            .await
                            .map_err(|e| EsError::BadResponse(e.to_string()))
                    }
                    .await;
                    match &result {
                        Ok(_) => breaker.record_success(),
                        Err(EsError::Closed) => {}
                        Err(_) => breaker.record_failure(),
                    }
                    result
                }
            })
            .await
    }

    fn build_http(&self) -> EsResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .danger_accept_invalid_certs(!self.config.verify_ssl);

        if let Some(path) = &self.config.ca_certs {
            let pem = std::fs::read(path)
                .map_err(|e| EsError::Configuration(format!("cannot read CA bundle: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| EsError::Configuration(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(proxy) = &self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| EsError::Configuration(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
            use base64::Engine as _;
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{user}:{pass}"));
            let mut headers = HeaderMap::new();
            let mut value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|e| EsError::Configuration(format!("invalid credentials: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        builder
            .build()
            .map_err(|e| EsError::Configuration(e.to_string()))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
