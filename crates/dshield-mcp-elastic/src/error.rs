//! Elasticsearch client errors.

use crate::pagination::DEEP_PAGE_LIMIT;

/// Result alias for client operations.
pub type EsResult<T> = Result<T, EsError>;

/// Errors from the Elasticsearch client. The server layer maps these onto
/// the wire taxonomy; messages here may name hosts and indices, the wire
/// mapping must not.
#[derive(Debug, thiserror::Error)]
pub enum EsError {
    /// `connect` has not succeeded yet, or `close` already ran.
    #[error("client is not connected")]
    NotConnected,

    /// The circuit breaker refused the request.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The client was closed while the request was in flight.
    #[error("client closed during request")]
    Closed,

    /// Transport-level failure after the retry budget was spent.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The backend answered 2xx but the body was not the expected shape.
    #[error("unexpected response body: {0}")]
    BadResponse(String),

    /// A cursor failed decoding or its fingerprint check.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Page-number pagination would reach past the deep-page limit.
    #[error(
        "page {page} with page_size {page_size} exceeds the deep pagination \
         limit of {DEEP_PAGE_LIMIT}; use cursor pagination"
    )]
    DeepPagination {
        /// Requested page number.
        page: usize,
        /// Requested page size.
        page_size: usize,
    },

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A filter value used an operator the query model does not know.
    #[error("unsupported filter for field '{field}': {reason}")]
    UnsupportedFilter {
        /// Field the filter targeted.
        field: String,
        /// What was wrong.
        reason: String,
    },
}

impl EsError {
    /// Whether the failure is transient enough to retry inside the client.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status } => *status >= 500,
            _ => false,
        }
    }
}
