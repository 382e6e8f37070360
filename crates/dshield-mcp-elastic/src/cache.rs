//! Fingerprint-keyed result cache.
//!
//! Pages are cached under `(fingerprint, page address)` with a TTL. A hit
//! reports `cached` complexity with zeroed scan counters; the events
//! themselves are shared, not copied.

use std::sync::Arc;
use std::time::Duration;

use dshield_mcp_core::Event;
use moka::future::Cache;

use crate::pagination::PageInfo;

/// Immutable cached page payload.
#[derive(Debug, Clone)]
pub struct CachedPage {
    /// Page events.
    pub events: Arc<Vec<Event>>,
    /// Total hits at query time.
    pub total_hits: u64,
    /// Page bookkeeping, for page-number mode.
    pub page_info: Option<PageInfo>,
    /// Cursor to the next page, when one exists.
    pub cursor: Option<String>,
}

/// TTL cache over query pages.
pub struct QueryCache {
    inner: Cache<String, CachedPage>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl QueryCache {
    /// Cache holding up to `capacity` pages for `ttl`.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Composite key for one page of one query.
    pub fn key(fingerprint: &str, page_address: &str) -> String {
        format!("{fingerprint}:{page_address}")
    }

    /// Look up a page.
    pub async fn get(&self, key: &str) -> Option<CachedPage> {
        self.inner.get(key).await
    }

    /// Store a page.
    pub async fn insert(&self, key: String, page: CachedPage) {
        self.inner.insert(key, page).await;
    }

    /// Drop everything; used when the index set rolls.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = QueryCache::new(16, Duration::from_secs(60));
        let key = QueryCache::key("fp", "page:1");
        assert!(cache.get(&key).await.is_none());

        cache
            .insert(
                key.clone(),
                CachedPage {
                    events: Arc::new(Vec::new()),
                    total_hits: 0,
                    page_info: None,
                    cursor: None,
                },
            )
            .await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = QueryCache::new(16, Duration::from_millis(20));
        let key = QueryCache::key("fp", "page:1");
        cache
            .insert(
                key.clone(),
                CachedPage {
                    events: Arc::new(Vec::new()),
                    total_hits: 1,
                    page_info: None,
                    cursor: None,
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(&key).await.is_none());
    }
}
