//! End-to-end client tests against a mocked Elasticsearch backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dshield_mcp_core::QueryComplexity;
use dshield_mcp_elastic::{
    ElasticsearchClient, ElasticsearchConfig, EsError, PageSelector, QuerySpec, StreamRequest,
};

const BASE_TS: i64 = 1_704_103_200_000; // 2024-01-01T10:00:00Z

fn config(url: &str) -> ElasticsearchConfig {
    ElasticsearchConfig {
        url: url.to_string(),
        verify_ssl: false,
        request_timeout: Duration::from_secs(5),
        cache_ttl: Duration::from_secs(60),
        ..ElasticsearchConfig::default()
    }
}

/// One ES hit for an event `i` minutes-descending from the base timestamp.
fn hit(index: usize, ts_ms: i64, source_ip: &str) -> Value {
    json!({
        "_id": format!("doc-{index:04}"),
        "_source": {
            "@timestamp": ts_ms,
            "source.ip": source_ip,
            "event.category": "network",
        },
        "sort": [ts_ms, format!("doc-{index:04}")],
    })
}

fn search_response(hits: Vec<Value>, total: u64) -> Value {
    json!({
        "took": 3,
        "_shards": { "total": 2, "successful": 2, "failed": 0 },
        "hits": {
            "total": { "value": total, "relation": "eq" },
            "hits": hits,
        }
    })
}

async fn mount_indices(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/_cat/indices/.*$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "index": "dshield-2024.01.01" }])),
        )
        .mount(server)
        .await;
}

async fn connected_client(server: &MockServer) -> Arc<ElasticsearchClient> {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "cluster_name": "test-cluster" })),
        )
        .mount(server)
        .await;
    mount_indices(server).await;

    let client = Arc::new(ElasticsearchClient::new(config(&server.uri())));
    client.connect().await.expect("connect succeeds");
    client
}

/// 250 events with strictly descending timestamps, split into pages of 100.
fn fixture_pages() -> (Vec<Value>, Vec<Value>, Vec<Value>) {
    let all: Vec<Value> = (0..250)
        .map(|i| hit(i, BASE_TS - (i as i64) * 1000, "192.0.2.1"))
        .collect();
    (
        all[..100].to_vec(),
        all[100..200].to_vec(),
        all[200..].to_vec(),
    )
}

#[tokio::test]
async fn test_cursor_contiguity_across_three_pages() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;
    let (page1, page2, page3) = fixture_pages();

    for page in [page1, page2, page3] {
        Mock::given(method("POST"))
            .and(path_regex(r"^/dshield-\*/_search$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_response(page, 250)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }

    let spec = QuerySpec::last_hours(24, 100);

    let first = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect("page 1");
    assert_eq!(first.events.len(), 100);
    assert_eq!(first.total_hits, 250);
    let cursor1 = first.cursor.clone().expect("cursor after page 1");

    let second = client
        .query_events(&spec, &PageSelector::Cursor(cursor1))
        .await
        .expect("page 2");
    assert_eq!(second.events.len(), 100);
    let cursor2 = second.cursor.clone().expect("cursor after page 2");

    let third = client
        .query_events(&spec, &PageSelector::Cursor(cursor2))
        .await
        .expect("page 3");
    assert_eq!(third.events.len(), 50);
    assert!(third.cursor.is_none(), "no cursor after the final page");

    // Union of the three pages: 250 unique events, strictly ordered.
    let mut seen = std::collections::HashSet::new();
    let mut last: Option<(i64, String)> = None;
    for event in first
        .events
        .iter()
        .chain(second.events.iter())
        .chain(third.events.iter())
    {
        assert!(seen.insert(event.doc_id.clone()), "duplicate {}", event.doc_id);
        if let Some((ts, id)) = &last {
            assert!(
                event.timestamp_ms < *ts || (event.timestamp_ms == *ts && event.doc_id < *id),
                "events out of order"
            );
        }
        last = Some((event.timestamp_ms, event.doc_id.clone()));
    }
    assert_eq!(seen.len(), 250);
}

#[tokio::test]
async fn test_cursor_rejected_after_filter_change() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;
    let (page1, _, _) = fixture_pages();

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(page1, 250)))
        .mount(&server)
        .await;

    let spec = QuerySpec::last_hours(24, 100);
    let first = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect("page 1");
    let cursor = first.cursor.expect("cursor");

    let changed = QuerySpec::last_hours(24, 100)
        .with_filters(&json!({"event.category": "malware"}))
        .expect("valid filters");
    let err = client
        .query_events(&changed, &PageSelector::Cursor(cursor))
        .await
        .expect_err("fingerprint mismatch");
    assert!(matches!(err, EsError::InvalidCursor(_)));
}

#[tokio::test]
async fn test_deep_page_guard_requires_cursor() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    let spec = QuerySpec::last_hours(24, 100);
    let err = client
        .query_events(&spec, &PageSelector::Number(101))
        .await
        .expect_err("past the deep-page limit");
    assert!(matches!(err, EsError::DeepPagination { .. }));
}

#[tokio::test]
async fn test_repeated_query_hits_cache() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;
    let (page1, _, _) = fixture_pages();

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(page1, 250)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let spec = QuerySpec::last_hours(24, 100);
    let first = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect("first query");
    assert!(!first.metrics.cache_hit);

    let second = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect("second query served from cache");
    assert!(second.metrics.cache_hit);
    assert_eq!(second.metrics.query_complexity, QueryComplexity::Cached);
    assert_eq!(second.metrics.indices_scanned, 0);
    assert_eq!(second.metrics.total_documents_examined, 0);
    assert_eq!(second.events.len(), first.events.len());
}

#[tokio::test]
async fn test_projection_records_field_reduction() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;
    let (page1, _, _) = fixture_pages();

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(page1, 250)))
        .mount(&server)
        .await;

    let spec = QuerySpec::last_hours(24, 100)
        .with_fields(vec!["@timestamp".to_string(), "source.ip".to_string()]);
    let page = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect("query");
    assert!(
        page.metrics
            .optimization_applied
            .contains(&"field_reduction".to_string())
    );
    assert_eq!(page.metrics.query_complexity, QueryComplexity::Optimized);
}

#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let server = MockServer::start().await;
    // The cluster answers its info probe, then everything else fails.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "cluster_name": "test-cluster" })),
        )
        .mount(&server)
        .await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = Arc::new(ElasticsearchClient::new(config(&server.uri())));
    client.connect().await.expect("connect succeeds");

    let spec = QuerySpec::last_hours(24, 10);
    // Two calls, three attempts each: six consecutive failures.
    for _ in 0..2 {
        let err = client
            .query_events(&spec, &PageSelector::Number(1))
            .await
            .expect_err("backend is failing");
        assert!(matches!(err, EsError::Status { .. }));
    }

    let err = client
        .query_events(&spec, &PageSelector::Number(1))
        .await
        .expect_err("breaker must be open");
    assert!(matches!(err, EsError::CircuitOpen));
}

#[tokio::test]
async fn test_aggregation_query_metrics() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 5,
            "_shards": { "total": 2 },
            "hits": { "total": { "value": 1200 }, "hits": [] },
            "aggregations": {
                "by_source": { "buckets": [{ "key": "192.0.2.1", "doc_count": 900 }] }
            }
        })))
        .mount(&server)
        .await;

    let spec = QuerySpec::last_hours(24, 0);
    let result = client
        .execute_aggregation_query(
            &spec,
            json!({ "by_source": { "terms": { "field": "source.ip" } } }),
        )
        .await
        .expect("aggregation");

    assert_eq!(result.metrics.query_complexity, QueryComplexity::Aggregation);
    assert!(result.metrics.aggregations_used);
    assert_eq!(
        result.aggregations["by_source"]["buckets"][0]["doc_count"],
        json!(900)
    );
}

#[tokio::test]
async fn test_stream_chunks_split_sessions_on_gap() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    // 10 events for one source a minute apart, then one 45 minutes later.
    let mut hits: Vec<Value> = (0..10)
        .map(|i| hit(i, BASE_TS + i as i64 * 60_000, "192.0.2.1"))
        .collect();
    hits.push(hit(10, BASE_TS + 45 * 60_000, "192.0.2.1"));

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(hits, 11)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(vec![], 11)))
        .mount(&server)
        .await;

    let chunk = client
        .stream_events_with_session_context(StreamRequest {
            time_range_hours: 24,
            chunk_size: 500,
            session_fields: vec!["source.ip".to_string()],
            max_session_gap_minutes: 30,
            filters: json!({}),
            stream_id: None,
        })
        .await
        .expect("stream chunk");

    assert_eq!(chunk.events.len(), 11);
    assert_eq!(chunk.next_stream_id, None);
    assert_eq!(chunk.session_context.sessions_in_chunk, 2);

    let summaries = &chunk.session_context.session_summaries;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].event_count, 10);
    assert!((summaries[0].duration_minutes - 9.0).abs() < f64::EPSILON);
    assert_eq!(summaries[1].event_count, 1);
    assert!(summaries[1].duration_minutes.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_stream_rejects_foreign_stream_id() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    let err = client
        .stream_events_with_session_context(StreamRequest {
            time_range_hours: 24,
            chunk_size: 100,
            session_fields: vec!["source.ip".to_string()],
            max_session_gap_minutes: 30,
            filters: json!({}),
            stream_id: Some("definitely-not-a-stream-id".to_string()),
        })
        .await
        .expect_err("bogus stream id");
    assert!(matches!(err, EsError::InvalidCursor(_)));
}
