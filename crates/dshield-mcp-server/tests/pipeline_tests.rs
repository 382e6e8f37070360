//! Full-pipeline tests: JSON-RPC request in, response out, against mocked
//! backends.

use std::sync::Arc;

use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dshield_mcp_protocol::jsonrpc::{Frame, JsonRpcRequest, RequestId};
use dshield_mcp_server::server::ServerCore;
use dshield_mcp_server::{ConnectionInfo, ServerConfig, ServerContext};

const BASE_TS: i64 = 1_704_103_200_000;

fn hit(index: usize, ts_ms: i64, source_ip: &str) -> Value {
    json!({
        "_id": format!("doc-{index:04}"),
        "_source": {
            "@timestamp": ts_ms,
            "source.ip": source_ip,
        },
        "sort": [ts_ms, format!("doc-{index:04}")],
    })
}

fn search_response(hits: Vec<Value>, total: u64) -> Value {
    json!({
        "took": 2,
        "_shards": { "total": 1 },
        "hits": { "total": { "value": total }, "hits": hits }
    })
}

/// Mock a healthy cluster: info, index listing, and DShield probe.
async fn mount_healthy_backends(es: &MockServer, dshield: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cluster_name": "t"})))
        .mount(es)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/_cat/indices/.*$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "index": "dshield-2024.01.01" }])),
        )
        .mount(es)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ip/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ip": {"attacks": 1}})))
        .mount(dshield)
        .await;
}

async fn server_with_backends(es: &MockServer, dshield: &MockServer, probe: bool) -> ServerCore {
    let config = ServerConfig {
        elasticsearch_url: es.uri(),
        dshield_api_url: dshield.uri(),
        ..ServerConfig::default()
    };
    let context = ServerContext::new(config).expect("context builds");
    let core = ServerCore::new(context).expect("server builds");
    if probe {
        let ctx = core.context();
        ctx.features.probe_all(&ctx.elastic, &ctx.dshield).await;
    }
    core
}

fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest::new(method, Some(params), RequestId::Number(id))
}

fn call(name: &str, arguments: Value) -> Value {
    json!({ "name": name, "arguments": arguments })
}

#[tokio::test]
async fn test_tools_list_reflects_probe_outcomes() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();
    let response = core
        .handle_request(request(1, "tools/list", json!({})), &conn)
        .await;
    let names: Vec<String> = response.result().expect("ok")["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str().map(str::to_string))
        .collect();

    assert!(names.contains(&"query_dshield_events".to_string()));
    assert!(names.contains(&"enrich_ip_with_dshield".to_string()));
    assert!(names.contains(&"analyze_campaign".to_string()));
    // Report rendering tracks whatever the LaTeX probe found on this host.
    let latex_available = core
        .context()
        .features
        .is_available(dshield_mcp_core::FeatureTag::Latex);
    assert_eq!(
        names.contains(&"generate_attack_report".to_string()),
        latex_available
    );
}

#[tokio::test]
async fn test_es_down_gates_query_tools_but_not_health() {
    // No mocks mounted: both probes fail.
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();

    let listing = core
        .handle_request(request(1, "tools/list", json!({})), &conn)
        .await;
    let names: Vec<String> = listing.result().expect("ok")["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["get_data_dictionary", "get_health_status"]);

    let gated = core
        .handle_request(
            request(2, "tools/call", call("query_dshield_events", json!({}))),
            &conn,
        )
        .await;
    assert_eq!(gated.error_object().expect("gated").code, -32011);

    let health = core
        .handle_request(
            request(3, "tools/call", call("get_health_status", json!({}))),
            &conn,
        )
        .await;
    assert_eq!(health.result().expect("health ok")["status"], "degraded");
}

#[tokio::test]
async fn test_query_tool_end_to_end_with_cursor() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    let all: Vec<Value> = (0..150)
        .map(|i| hit(i, BASE_TS - i as i64 * 1000, "192.0.2.1"))
        .collect();
    for page in [all[..100].to_vec(), all[100..].to_vec()] {
        Mock::given(method("POST"))
            .and(path_regex(r"^/dshield-\*/_search$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_response(page, 150)))
            .up_to_n_times(1)
            .mount(&es)
            .await;
    }

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();

    let first = core
        .handle_request(
            request(1, "tools/call", call("query_dshield_events", json!({"page_size": 100}))),
            &conn,
        )
        .await;
    let first = first.result().expect("page 1").clone();
    assert_eq!(first["events"].as_array().expect("events").len(), 100);
    assert_eq!(first["total_hits"], 150);
    let cursor = first["cursor"].as_str().expect("cursor").to_string();
    assert_eq!(first["next_page_token"], first["cursor"], "alias matches");

    let second = core
        .handle_request(
            request(
                2,
                "tools/call",
                call(
                    "query_dshield_events",
                    json!({"page_size": 100, "cursor": cursor}),
                ),
            ),
            &conn,
        )
        .await;
    let second = second.result().expect("page 2").clone();
    assert_eq!(second["events"].as_array().expect("events").len(), 50);
    assert!(second.get("cursor").is_none(), "final page has no cursor");
}

#[tokio::test]
async fn test_stream_tool_end_to_end() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    let mut hits: Vec<Value> = (0..10)
        .map(|i| hit(i, BASE_TS + i as i64 * 60_000, "192.0.2.1"))
        .collect();
    hits.push(hit(10, BASE_TS + 45 * 60_000, "192.0.2.1"));
    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(hits, 11)))
        .up_to_n_times(1)
        .mount(&es)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_response(vec![], 11)))
        .mount(&es)
        .await;

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();
    let response = core
        .handle_request(
            request(
                1,
                "tools/call",
                call(
                    "stream_dshield_events_with_session_context",
                    json!({
                        "chunk_size": 500,
                        "session_fields": ["source.ip"],
                        "max_session_gap_minutes": 30
                    }),
                ),
            ),
            &conn,
        )
        .await;

    let result = response.result().expect("stream ok").clone();
    assert_eq!(result["events"].as_array().expect("events").len(), 11);
    assert_eq!(result["next_stream_id"], Value::Null);
    let context = &result["session_context"];
    assert_eq!(context["sessions_in_chunk"], 2);
    let summaries = context["session_summaries"].as_array().expect("summaries");
    assert_eq!(summaries[0]["event_count"], 10);
    assert_eq!(summaries[1]["event_count"], 1);
}

#[tokio::test]
async fn test_enrichment_tool_end_to_end() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();
    let response = core
        .handle_request(
            request(
                1,
                "tools/call",
                call("enrich_ip_with_dshield", json!({"ip_address": "192.0.2.9"})),
            ),
            &conn,
        )
        .await;
    let result = response.result().expect("enrichment ok");
    assert_eq!(result["enrichment"]["ip_address"], "192.0.2.9");
    assert_eq!(result["enrichment"]["source"], "dshield");
}

#[tokio::test]
async fn test_campaign_workflow_end_to_end() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/dshield-\*/_search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 4,
            "_shards": { "total": 1 },
            "hits": { "total": { "value": 42 }, "hits": [] },
            "aggregations": {
                "sources": { "buckets": [{ "key": "192.0.2.1", "doc_count": 40 }] },
                "span": {
                    "min_as_string": "2024-01-01T00:00:00Z",
                    "max_as_string": "2024-01-02T00:00:00Z"
                },
                "destinations": { "buckets": [{ "key": "198.51.100.7", "doc_count": 12 }] },
                "ports": { "buckets": [{ "key": 22, "doc_count": 30 }] },
                "categories": { "buckets": [] },
                "timeline": {
                    "buckets": [
                        { "key_as_string": "2024-01-01T00:00:00Z", "doc_count": 20 },
                        { "key_as_string": "2024-01-01T01:00:00Z", "doc_count": 22 }
                    ]
                }
            }
        })))
        .mount(&es)
        .await;

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();

    let analyzed = core
        .handle_request(
            request(
                1,
                "tools/call",
                call("analyze_campaign", json!({"seed_iocs": ["192.0.2.1"]})),
            ),
            &conn,
        )
        .await;
    let analyzed = analyzed.result().expect("campaign analyzed").clone();
    let campaign_id = analyzed["campaign_id"].as_str().expect("id").to_string();
    assert_eq!(analyzed["event_count"], 42);
    assert_eq!(analyzed["top_sources"][0][0], "192.0.2.1");

    let timeline = core
        .handle_request(
            request(
                2,
                "tools/call",
                call(
                    "get_campaign_timeline",
                    json!({"campaign_id": campaign_id, "granularity": "hourly"}),
                ),
            ),
            &conn,
        )
        .await;
    let timeline = timeline.result().expect("timeline ok").clone();
    assert_eq!(timeline["buckets"].as_array().expect("buckets").len(), 2);

    let expanded = core
        .handle_request(
            request(
                3,
                "tools/call",
                call("expand_campaign_indicators", json!({"campaign_id": campaign_id})),
            ),
            &conn,
        )
        .await;
    let expanded = expanded.result().expect("expansion ok").clone();
    assert_eq!(expanded["related_destinations"][0]["value"], "198.51.100.7");

    let unknown = core
        .handle_request(
            request(
                4,
                "tools/call",
                call("get_campaign_timeline", json!({"campaign_id": "campaign-unknown"})),
            ),
            &conn,
        )
        .await;
    assert_eq!(unknown.error_object().expect("unknown campaign").code, -32602);
}

#[tokio::test]
async fn test_invalid_cursor_surfaces_taxonomy_code() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    mount_healthy_backends(&es, &dshield).await;

    let core = server_with_backends(&es, &dshield, true).await;
    let conn = ConnectionInfo::stdio();
    let response = core
        .handle_request(
            request(
                1,
                "tools/call",
                call("query_dshield_events", json!({"cursor": "bogus-cursor"})),
            ),
            &conn,
        )
        .await;
    assert_eq!(response.error_object().expect("invalid cursor").code, -32015);
}

#[tokio::test]
async fn test_frame_validation_through_core() {
    let es = MockServer::start().await;
    let dshield = MockServer::start().await;
    let core = server_with_backends(&es, &dshield, false).await;

    assert!(core.validate_frame(b"garbage").is_none());
    let frame = core
        .validate_frame(br#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#)
        .expect("valid frame");
    assert!(matches!(frame, Frame::Request(_)));
}
