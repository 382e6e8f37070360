//! Session-aware event streaming.
//!
//! [`EsEventStream`] adapts search-after paging onto the event-stream
//! abstraction; [`ElasticsearchClient::stream_events_with_session_context`]
//! drives the session chunker over it and assembles the wire response one
//! chunk per call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use dshield_mcp_core::{
    ChunkError, Event, EventStream, PerformanceMetrics, SessionChunker, SessionChunkerConfig,
    SessionSummary, StreamError,
};

use crate::client::ElasticsearchClient;
use crate::cursor::Cursor;
use crate::error::{EsError, EsResult};
use crate::query::QuerySpec;

/// Parameters of one streaming call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Trailing time window to scan.
    pub time_range_hours: u32,
    /// Target events per chunk.
    pub chunk_size: usize,
    /// Ordered session-key fields.
    pub session_fields: Vec<String>,
    /// Session gap bound in minutes.
    pub max_session_gap_minutes: u32,
    /// Caller-supplied filters object.
    pub filters: Value,
    /// Resume token from a previous chunk.
    pub stream_id: Option<String>,
}

/// Session bookkeeping attached to every streamed chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    /// Fields forming the session key.
    pub session_fields: Vec<String>,
    /// Gap bound in minutes.
    pub max_session_gap_minutes: u32,
    /// Distinct sessions with events in this chunk.
    pub sessions_in_chunk: usize,
    /// Sessions closed during this chunk.
    pub session_summaries: Vec<SessionSummary>,
    /// Cost observability for this call.
    pub performance_metrics: PerformanceMetrics,
}

/// One streamed chunk.
#[derive(Debug)]
pub struct StreamChunk {
    /// Chunk events in stream order.
    pub events: Vec<Event>,
    /// Upstream estimate of the full scan, when known.
    pub total_count_estimate: Option<u64>,
    /// Token for the next chunk; `None` when the scan is complete.
    pub next_stream_id: Option<String>,
    /// Session bookkeeping.
    pub session_context: SessionContext,
}

/// Search-after paging presented as an event stream.
pub struct EsEventStream {
    client: Arc<ElasticsearchClient>,
    spec: QuerySpec,
    fingerprint: String,
    fetch_size: usize,
    buffer: VecDeque<Event>,
    /// Position of the last event handed out; the resume point.
    last_returned: Option<Cursor>,
    total: Option<u64>,
    exhausted: bool,
    cancelled: bool,
}

impl std::fmt::Debug for EsEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsEventStream")
            .field("fingerprint", &self.fingerprint)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl EsEventStream {
    /// Fresh stream from the start of the scan.
    pub fn new(
        client: Arc<ElasticsearchClient>,
        spec: QuerySpec,
        fingerprint: String,
        fetch_size: usize,
    ) -> Self {
        Self {
            client,
            spec,
            fingerprint,
            fetch_size: fetch_size.max(1),
            buffer: VecDeque::new(),
            last_returned: None,
            total: None,
            exhausted: false,
            cancelled: false,
        }
    }

    /// Stream resuming after a previously returned event. The token's
    /// fingerprint must match the current query.
    pub fn resume(
        client: Arc<ElasticsearchClient>,
        spec: QuerySpec,
        fingerprint: String,
        fetch_size: usize,
        token: &str,
    ) -> EsResult<Self> {
        let cursor = Cursor::decode_for(token, &fingerprint)?;
        let mut stream = Self::new(client, spec, fingerprint, fetch_size);
        stream.last_returned = Some(cursor);
        Ok(stream)
    }

    async fn refill(&mut self) -> Result<(), StreamError> {
        let page = self
            .client
            .fetch_page_after(&self.spec, self.last_returned.as_ref(), self.fetch_size)
            .await
            .map_err(|e| StreamError::Upstream(e.to_string()))?;
        self.total.get_or_insert(page.total_hits);
        if page.events.is_empty() {
            self.exhausted = true;
        } else {
            self.buffer.extend(page.events);
        }
        Ok(())
    }
}

#[async_trait]
impl EventStream for EsEventStream {
    async fn next(&mut self) -> Result<Option<Event>, StreamError> {
        if self.cancelled {
            return Err(StreamError::Cancelled);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.refill().await?;
        }
        match self.buffer.pop_front() {
            Some(event) => {
                self.last_returned =
                    Some(Cursor::new(event.timestamp_ms, &event.doc_id, &self.fingerprint));
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    fn resume_token(&self) -> Option<String> {
        self.last_returned.as_ref().map(Cursor::encode)
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn total_estimate(&self) -> Option<u64> {
        self.total
    }
}

impl ElasticsearchClient {
    /// Stream one session-aligned chunk of events. Call again with the
    /// returned `next_stream_id` to continue the scan.
    pub async fn stream_events_with_session_context(
        self: &Arc<Self>,
        request: StreamRequest,
    ) -> EsResult<StreamChunk> {
        let started = Instant::now();

        let chunker_config = SessionChunkerConfig {
            session_fields: request.session_fields.clone(),
            max_session_gap_minutes: request.max_session_gap_minutes,
            chunk_size: request.chunk_size,
        };

        let spec = QuerySpec::last_hours(request.time_range_hours, request.chunk_size)
            .with_filters(&request.filters)?;
        let indices = self.discover_indices().await?;
        let fingerprint = spec.fingerprint(&indices);

        let (mut chunker, upstream) = match &request.stream_id {
            Some(stream_id) => SessionChunker::resume(chunker_config, stream_id)
                .map_err(map_chunk_error)?,
            None => (SessionChunker::new(chunker_config).map_err(map_chunk_error)?, None),
        };

        let mut stream = match upstream {
            Some(token) => EsEventStream::resume(
                Arc::clone(self),
                spec,
                fingerprint,
                request.chunk_size,
                &token,
            )?,
            None => EsEventStream::new(
                Arc::clone(self),
                spec,
                fingerprint,
                request.chunk_size,
            ),
        };

        let outcome = chunker
            .next_chunk(&mut stream)
            .await
            .map_err(map_chunk_error)?;

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut metrics = if outcome.events.is_empty() {
            PerformanceMetrics::empty(elapsed, indices.len())
        } else {
            PerformanceMetrics::simple(
                elapsed,
                indices.len(),
                outcome.total_count_estimate.unwrap_or(0),
            )
        };
        if outcome.forced_boundary {
            metrics.record_optimization("session_boundary_forced");
        }

        debug!(
            events = outcome.events.len(),
            sessions = outcome.sessions_in_chunk,
            complete = outcome.next_stream_id.is_none(),
            "streamed session-aligned chunk"
        );

        Ok(StreamChunk {
            total_count_estimate: outcome.total_count_estimate,
            next_stream_id: outcome.next_stream_id,
            session_context: SessionContext {
                session_fields: request.session_fields,
                max_session_gap_minutes: request.max_session_gap_minutes,
                sessions_in_chunk: outcome.sessions_in_chunk,
                session_summaries: outcome.session_summaries,
                performance_metrics: metrics,
            },
            events: outcome.events,
        })
    }
}

fn map_chunk_error(err: ChunkError) -> EsError {
    match err {
        ChunkError::InvalidStreamId => EsError::InvalidCursor("unrecognized stream id".to_string()),
        ChunkError::Stream(StreamError::Upstream(message)) => EsError::Transport(message),
        ChunkError::Stream(StreamError::Cancelled) => EsError::Closed,
        other => EsError::BadResponse(other.to_string()),
    }
}
