//! The restartable event-stream abstraction.
//!
//! Both the paginated query path and the session chunker consume events
//! through [`EventStream`]: a finite, lazily-produced sequence with
//! cooperative cancellation and an optional resume token for picking the
//! scan back up in a later call.

use async_trait::async_trait;

use crate::types::Event;

/// Errors surfaced while pulling events from an upstream source.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The upstream backend failed after its retry budget was exhausted.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    /// The stream was cancelled between events.
    #[error("stream cancelled")]
    Cancelled,
}

/// A finite, restartable sequence of time-ordered events.
///
/// Implementations fetch lazily (e.g. page-by-page from Elasticsearch) and
/// must return `Ok(None)` exactly once at end of stream. After
/// [`EventStream::cancel`], `next` returns [`StreamError::Cancelled`].
#[async_trait]
pub trait EventStream: Send {
    /// Pull the next event, or `None` at end of stream.
    async fn next(&mut self) -> Result<Option<Event>, StreamError>;

    /// Opaque token from which an equivalent stream can resume after the
    /// last event returned by [`EventStream::next`]. Must stay valid at end
    /// of stream (resuming there yields an empty stream); `None` only when
    /// the source cannot resume at all.
    fn resume_token(&self) -> Option<String>;

    /// Cooperatively cancel the stream; subsequent `next` calls fail fast.
    fn cancel(&mut self);

    /// Estimated total number of events the full scan would yield, when the
    /// upstream reports one.
    fn total_estimate(&self) -> Option<u64> {
        None
    }
}

/// An in-memory stream over a fixed event list.
///
/// The resume token is the index of the next unread event. Used as the
/// fixture stream throughout the test suites.
#[derive(Debug, Clone)]
pub struct VecEventStream {
    events: Vec<Event>,
    position: usize,
    cancelled: bool,
}

impl VecEventStream {
    /// Stream over `events` from the beginning.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            position: 0,
            cancelled: false,
        }
    }

    /// Stream over `events` starting at a previously returned resume token.
    pub fn resume(events: Vec<Event>, token: &str) -> Option<Self> {
        let position: usize = token.parse().ok()?;
        (position <= events.len()).then_some(Self {
            events,
            position,
            cancelled: false,
        })
    }
}

#[async_trait]
impl EventStream for VecEventStream {
    async fn next(&mut self) -> Result<Option<Event>, StreamError> {
        if self.cancelled {
            return Err(StreamError::Cancelled);
        }
        let event = self.events.get(self.position).cloned();
        if event.is_some() {
            self.position += 1;
        }
        Ok(event)
    }

    fn resume_token(&self) -> Option<String> {
        Some(self.position.to_string())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn total_estimate(&self) -> Option<u64> {
        Some(self.events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixture(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| {
                let serde_json::Value::Object(map) = json!({
                    "@timestamp": 1_704_103_200_000_i64 + i as i64 * 1000,
                }) else {
                    unreachable!()
                };
                Event::from_source(format!("doc-{i}"), map).expect("valid event")
            })
            .collect()
    }

    #[tokio::test]
    async fn test_vec_stream_drains_in_order() {
        let mut stream = VecEventStream::new(fixture(3));
        let mut ids = Vec::new();
        while let Some(event) = stream.next().await.expect("stream ok") {
            ids.push(event.doc_id);
        }
        assert_eq!(ids, vec!["doc-0", "doc-1", "doc-2"]);
        // The token stays valid at end of stream and resumes to emptiness.
        let token = stream.resume_token().expect("token at EOF");
        let mut resumed = VecEventStream::resume(fixture(3), &token).expect("valid token");
        assert!(resumed.next().await.expect("stream ok").is_none());
    }

    #[tokio::test]
    async fn test_vec_stream_resume_round_trip() {
        let events = fixture(4);
        let mut stream = VecEventStream::new(events.clone());
        stream.next().await.expect("stream ok");
        stream.next().await.expect("stream ok");

        let token = stream.resume_token().expect("mid-stream token");
        let mut resumed = VecEventStream::resume(events, &token).expect("valid token");
        let next = resumed.next().await.expect("stream ok").expect("has event");
        assert_eq!(next.doc_id, "doc-2");
    }

    #[tokio::test]
    async fn test_cancel_fails_fast() {
        let mut stream = VecEventStream::new(fixture(2));
        stream.cancel();
        assert!(matches!(stream.next().await, Err(StreamError::Cancelled)));
    }
}
