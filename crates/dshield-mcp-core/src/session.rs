//! Gap-bounded session chunking.
//!
//! Partitions a time-ordered event stream into sessions keyed by a composite
//! field tuple, and cuts the stream into chunks whose boundaries snap to
//! session boundaries. Open-session state survives across chunks through an
//! opaque stream id, so a client can page through a long scan without ever
//! seeing a session split inside a chunk.
//!
//! The stream may run in either time direction; the gap test uses the
//! absolute distance between an event and the session's nearest-seen
//! timestamp.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::stream::EventStream;
use crate::types::{Event, SessionKey};

/// Largest permitted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Chunker configuration and input validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// `session_fields` was empty.
    #[error("session_fields must name at least one field")]
    EmptySessionFields,
    /// `max_session_gap_minutes` was zero.
    #[error("max_session_gap_minutes must be at least 1")]
    ZeroGap,
    /// `chunk_size` fell outside `1..=1000`.
    #[error("chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {0}")]
    ChunkSizeOutOfRange(usize),
    /// A stream id could not be decoded.
    #[error("unrecognized stream id")]
    InvalidStreamId,
    /// The upstream event source failed.
    #[error(transparent)]
    Stream(#[from] crate::stream::StreamError),
}

/// Validated chunker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionChunkerConfig {
    /// Ordered fields forming the session key.
    pub session_fields: Vec<String>,
    /// Largest inter-event gap, in minutes, keeping a session open.
    pub max_session_gap_minutes: u32,
    /// Target events per chunk; the hard ceiling is twice this.
    pub chunk_size: usize,
}

impl SessionChunkerConfig {
    /// Validate bounds: non-empty fields, gap ≥ 1, chunk size in `1..=1000`.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.session_fields.is_empty() {
            return Err(ChunkError::EmptySessionFields);
        }
        if self.max_session_gap_minutes == 0 {
            return Err(ChunkError::ZeroGap);
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ChunkError::ChunkSizeOutOfRange(self.chunk_size));
        }
        Ok(())
    }
}

/// Summary of a session closed within a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// The joined session key.
    pub session_key: SessionKey,
    /// Events observed while the session was open.
    pub event_count: u64,
    /// Span between the earliest and latest event, in minutes.
    pub duration_minutes: f64,
    /// First observed value for each session field, plus `synthetic` for
    /// all-empty keys.
    pub metadata: Map<String, Value>,
}

/// One chunk of events plus session bookkeeping.
#[derive(Debug)]
pub struct ChunkOutcome {
    /// Events in original stream order.
    pub events: Vec<Event>,
    /// Upstream estimate of the full scan size, when known.
    pub total_count_estimate: Option<u64>,
    /// Token resuming the scan after this chunk; `None` when exhausted.
    pub next_stream_id: Option<String>,
    /// Distinct sessions with at least one event in this chunk.
    pub sessions_in_chunk: usize,
    /// Sessions closed during this chunk.
    pub session_summaries: Vec<SessionSummary>,
    /// Whether the hard ceiling forced a cut away from a session boundary.
    pub forced_boundary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenSession {
    key: SessionKey,
    first_ts_ms: i64,
    last_ts_ms: i64,
    event_count: u64,
    metadata: Map<String, Value>,
    /// Chunk-local marker: whether this session received an event in the
    /// chunk currently being built. Not part of the checkpoint.
    #[serde(skip)]
    touched: bool,
}

impl OpenSession {
    fn open(key: SessionKey, event: &Event, session_fields: &[String]) -> Self {
        let mut metadata = Map::new();
        for field in session_fields {
            if let Some(value) = event.field(field) {
                metadata.insert(field.clone(), value.clone());
            }
        }
        if key.is_all_empty() {
            metadata.insert("synthetic".to_string(), Value::Bool(true));
        }
        Self {
            key,
            first_ts_ms: event.timestamp_ms,
            last_ts_ms: event.timestamp_ms,
            event_count: 1,
            metadata,
            touched: true,
        }
    }

    fn absorb(&mut self, event: &Event) {
        self.first_ts_ms = self.first_ts_ms.min(event.timestamp_ms);
        self.last_ts_ms = self.last_ts_ms.max(event.timestamp_ms);
        self.event_count += 1;
    }

    /// Absolute distance from this session's nearest-seen timestamp.
    fn gap_to(&self, event: &Event) -> i64 {
        let below = (event.timestamp_ms - self.first_ts_ms).abs();
        let above = (event.timestamp_ms - self.last_ts_ms).abs();
        if self.first_ts_ms <= event.timestamp_ms && event.timestamp_ms <= self.last_ts_ms {
            0
        } else {
            below.min(above)
        }
    }

    fn into_summary(self) -> SessionSummary {
        SessionSummary {
            session_key: self.key,
            event_count: self.event_count,
            duration_minutes: (self.last_ts_ms - self.first_ts_ms) as f64 / 60_000.0,
            metadata: self.metadata,
        }
    }
}

/// Serialized chunker state carried inside a stream id.
#[derive(Debug, Serialize, Deserialize)]
struct StreamCheckpoint {
    upstream: Option<String>,
    open_sessions: Vec<OpenSession>,
    pending: Option<Event>,
}

/// The session chunker. One instance drives one scan; each
/// [`SessionChunker::next_chunk`] call emits one chunk.
///
/// If a `next_chunk` future is cancelled mid-flight, the partial chunk is
/// discarded; rebuild the chunker from the last returned stream id to
/// continue.
#[derive(Debug)]
pub struct SessionChunker {
    config: SessionChunkerConfig,
    gap_ms: i64,
    open: HashMap<SessionKey, OpenSession>,
    /// Lookahead event buffered across chunk boundaries.
    pending: Option<Event>,
    upstream_resume: Option<String>,
}

impl SessionChunker {
    /// Start a fresh scan.
    pub fn new(config: SessionChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        let gap_ms = i64::from(config.max_session_gap_minutes) * 60_000;
        Ok(Self {
            config,
            gap_ms,
            open: HashMap::new(),
            pending: None,
            upstream_resume: None,
        })
    }

    /// Resume a scan from a previously returned stream id. Returns the
    /// chunker and the upstream resume token the caller must hand to its
    /// event source.
    pub fn resume(
        config: SessionChunkerConfig,
        stream_id: &str,
    ) -> Result<(Self, Option<String>), ChunkError> {
        let raw = URL_SAFE_NO_PAD
            .decode(stream_id)
            .map_err(|_| ChunkError::InvalidStreamId)?;
        let checkpoint: StreamCheckpoint =
            serde_json::from_slice(&raw).map_err(|_| ChunkError::InvalidStreamId)?;

        let mut chunker = Self::new(config)?;
        chunker.open = checkpoint
            .open_sessions
            .into_iter()
            .map(|s| (s.key.clone(), s))
            .collect();
        chunker.pending = checkpoint.pending;
        chunker.upstream_resume = checkpoint.upstream.clone();
        Ok((chunker, checkpoint.upstream))
    }

    /// Pull events from `stream` until a session-aligned cut and return the
    /// chunk. Subsequent calls continue the scan.
    pub async fn next_chunk<S: EventStream + ?Sized>(
        &mut self,
        stream: &mut S,
    ) -> Result<ChunkOutcome, ChunkError> {
        let mut events: Vec<Event> = Vec::with_capacity(self.config.chunk_size);
        let mut summaries: Vec<SessionSummary> = Vec::new();
        let mut sessions_touched: usize = 0;
        let mut forced = false;
        let ceiling = self.config.chunk_size * 2;
        let mut exhausted = false;

        for session in self.open.values_mut() {
            session.touched = false;
        }

        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => match stream.next().await? {
                    Some(event) => event,
                    None => {
                        exhausted = true;
                        break;
                    }
                },
            };

            if events.len() >= self.config.chunk_size {
                if self.would_open_session(&event) {
                    self.pending = Some(event);
                    break;
                }
                if events.len() >= ceiling {
                    debug!(
                        chunk_len = events.len(),
                        ceiling, "no session boundary before hard ceiling, forcing cut"
                    );
                    forced = true;
                    self.pending = Some(event);
                    break;
                }
            }

            if let Some(summary) = self.ingest(&event, &mut sessions_touched) {
                summaries.push(summary);
            }
            events.push(event);
        }

        if exhausted {
            // Stream closed: every remaining open session closes now.
            let mut remaining: Vec<OpenSession> = self.open.drain().map(|(_, s)| s).collect();
            remaining.sort_by_key(|s| s.first_ts_ms);
            summaries.extend(remaining.into_iter().map(OpenSession::into_summary));
        }

        self.upstream_resume = stream.resume_token();
        let next_stream_id = if exhausted { None } else { self.stream_id()? };

        Ok(ChunkOutcome {
            total_count_estimate: stream.total_estimate(),
            next_stream_id,
            sessions_in_chunk: sessions_touched,
            session_summaries: summaries,
            forced_boundary: forced,
            events,
        })
    }

    /// Whether this event would start a new session for its key.
    fn would_open_session(&self, event: &Event) -> bool {
        let key = SessionKey::from_event(event, &self.config.session_fields);
        match self.open.get(&key) {
            None => true,
            Some(session) => session.gap_to(event) > self.gap_ms,
        }
    }

    /// Fold an event into the open-session map. Returns the summary of a
    /// session this event closed, if any.
    fn ingest(&mut self, event: &Event, sessions_touched: &mut usize) -> Option<SessionSummary> {
        let key = SessionKey::from_event(event, &self.config.session_fields);
        match self.open.remove(&key) {
            Some(mut session) if session.gap_to(event) <= self.gap_ms => {
                if !session.touched {
                    // First event for a session restored from a checkpoint.
                    session.touched = true;
                    *sessions_touched += 1;
                }
                session.absorb(event);
                self.open.insert(key, session);
                None
            }
            Some(session) => {
                // Same key, outside the gap: close the old session, open a new one.
                *sessions_touched += 1;
                self.open.insert(
                    key.clone(),
                    OpenSession::open(key, event, &self.config.session_fields),
                );
                Some(session.into_summary())
            }
            None => {
                *sessions_touched += 1;
                self.open.insert(
                    key.clone(),
                    OpenSession::open(key, event, &self.config.session_fields),
                );
                None
            }
        }
    }

    fn stream_id(&self) -> Result<Option<String>, ChunkError> {
        let checkpoint = StreamCheckpoint {
            upstream: self.upstream_resume.clone(),
            open_sessions: self.open.values().cloned().collect(),
            pending: self.pending.clone(),
        };
        let raw = serde_json::to_vec(&checkpoint).map_err(|_| ChunkError::InvalidStreamId)?;
        Ok(Some(URL_SAFE_NO_PAD.encode(raw)))
    }
}
