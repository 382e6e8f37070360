//! Opaque pagination cursors.
//!
//! A cursor encodes the last event's sort tuple plus the query fingerprint.
//! Replaying an older cursor is allowed and yields the same next page while
//! indices are stable; presenting a cursor against a changed query fails the
//! fingerprint check.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::EsError;

/// Decoded cursor contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Sort timestamp of the last event on the previous page.
    pub sort_ts_ms: i64,
    /// Document-id tiebreaker of that event.
    pub doc_id: String,
    /// Fingerprint of the query that produced this cursor.
    pub fingerprint: String,
}

impl Cursor {
    /// Build a cursor for the page ending at `(sort_ts_ms, doc_id)`.
    pub fn new(sort_ts_ms: i64, doc_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            sort_ts_ms,
            doc_id: doc_id.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Encode as an opaque token.
    pub fn encode(&self) -> String {
        // Infallible for this struct shape.
        let raw = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode a token without checking the fingerprint.
    pub fn decode(token: &str) -> Result<Self, EsError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| EsError::InvalidCursor("token is not base64".to_string()))?;
        serde_json::from_slice(&raw)
            .map_err(|_| EsError::InvalidCursor("token does not decode".to_string()))
    }

    /// Decode and verify the token belongs to the query identified by
    /// `expected_fingerprint`.
    pub fn decode_for(token: &str, expected_fingerprint: &str) -> Result<Self, EsError> {
        let cursor = Self::decode(token)?;
        if cursor.fingerprint != expected_fingerprint {
            return Err(EsError::InvalidCursor(
                "cursor does not match the current query".to_string(),
            ));
        }
        Ok(cursor)
    }

    /// The `search_after` array for the next page.
    pub fn search_after(&self) -> serde_json::Value {
        serde_json::json!([self.sort_ts_ms, self.doc_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip() {
        let cursor = Cursor::new(1_704_103_200_000, "doc-99", "fp-abc");
        let token = cursor.encode();
        assert_eq!(Cursor::decode(&token).expect("decodes"), cursor);
    }

    #[test]
    fn test_fingerprint_guard() {
        let token = Cursor::new(1, "d", "fp-old").encode();
        assert!(Cursor::decode_for(&token, "fp-old").is_ok());
        assert!(matches!(
            Cursor::decode_for(&token, "fp-new"),
            Err(EsError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        assert!(matches!(Cursor::decode("!!!"), Err(EsError::InvalidCursor(_))));
        let not_a_cursor = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(matches!(
            Cursor::decode(&not_a_cursor),
            Err(EsError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_search_after_shape() {
        let cursor = Cursor::new(42, "doc-1", "fp");
        assert_eq!(cursor.search_after(), serde_json::json!([42, "doc-1"]));
    }
}
