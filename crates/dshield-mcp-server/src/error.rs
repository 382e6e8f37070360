//! Mapping backend errors onto the wire taxonomy.
//!
//! The only place client-crate errors become JSON-RPC errors. Backend
//! detail (hosts, index names, raw diagnostics) stays in the server log;
//! the wire gets generic messages.

use tracing::error;

use dshield_mcp_dshield::DshieldError;
use dshield_mcp_elastic::EsError;
use dshield_mcp_protocol::McpError;

/// Map an Elasticsearch client error onto the taxonomy.
pub fn map_es_error(err: EsError) -> McpError {
    match err {
        EsError::InvalidCursor(_) => McpError::invalid_cursor("cursor does not match this query"),
        EsError::DeepPagination { page, page_size } => McpError::invalid_params(
            format!(
                "page {page} with page_size {page_size} is past the deep pagination limit; \
                 use cursor pagination"
            ),
            "/page_number",
        ),
        EsError::UnsupportedFilter { field, reason } => McpError::invalid_params(
            format!("unsupported filter on '{field}': {reason}"),
            format!("/filters/{field}"),
        ),
        EsError::CircuitOpen
        | EsError::NotConnected
        | EsError::Closed
        | EsError::Transport(_)
        | EsError::Status { .. }
        | EsError::BadResponse(_) => {
            error!(%err, "event store request failed");
            McpError::upstream_unavailable("event store is unavailable")
        }
        EsError::Configuration(_) => {
            error!(%err, "event store misconfigured");
            McpError::internal("server configuration error")
        }
    }
}

/// Map a DShield client error onto the taxonomy.
pub fn map_dshield_error(err: DshieldError) -> McpError {
    match err {
        DshieldError::BatchTooLarge { got, limit } => McpError::invalid_params(
            format!("batch of {got} exceeds the enrichment limit of {limit}"),
            "/ip_addresses",
        ),
        DshieldError::Transport(_) | DshieldError::Status(_) | DshieldError::BadResponse(_) => {
            error!(%err, "threat intelligence request failed");
            McpError::upstream_unavailable("threat intelligence service is unavailable")
        }
        DshieldError::Configuration(_) => {
            error!(%err, "threat intelligence client misconfigured");
            McpError::internal("server configuration error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dshield_mcp_protocol::McpErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cursor_errors_map_to_invalid_cursor() {
        let err = map_es_error(EsError::InvalidCursor("detail".to_string()));
        assert_eq!(err.kind, McpErrorKind::InvalidCursor);
    }

    #[test]
    fn test_transport_detail_is_redacted() {
        let err = map_es_error(EsError::Transport(
            "connection refused to https://secret-host:9200".to_string(),
        ));
        assert_eq!(err.kind, McpErrorKind::UpstreamUnavailable);
        assert!(!err.message.contains("secret-host"), "backend host must not leak");
    }

    #[test]
    fn test_deep_page_maps_to_invalid_params() {
        let err = map_es_error(EsError::DeepPagination {
            page: 101,
            page_size: 100,
        });
        assert_eq!(err.kind, McpErrorKind::InvalidParams);
        assert_eq!(err.data.expect("pointer")["pointer"], "/page_number");
    }

    #[test]
    fn test_batch_limit_maps_to_invalid_params() {
        let err = map_dshield_error(DshieldError::BatchTooLarge { got: 500, limit: 100 });
        assert_eq!(err.kind, McpErrorKind::InvalidParams);
    }
}
