// crates/vitrina-server/src/session.rs
// Per-session result cache (pagination) and process-wide search history

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;
use vitrina_types::{Product, SearchHistoryItem};

struct StoredSession {
    results: Vec<Product>,
    total_found: usize,
    created: Instant,
}

/// One pagination batch.
#[derive(Debug, Clone, Default)]
pub struct SessionPage {
    pub products: Vec<Product>,
    pub next_offset: usize,
    pub has_more: bool,
    pub total_found: usize,
}

/// Frozen result lists keyed by session id, for load-more pagination.
/// Entries expire after a TTL; above `max_sessions` the oldest entries
/// (by creation time) are evicted first. Latest write per session wins.
pub struct SessionStore {
    max_sessions: usize,
    ttl: Duration,
    inner: Mutex<HashMap<String, StoredSession>>,
}

impl SessionStore {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a frozen copy of the ordered results.
    pub async fn store(&self, session_id: &str, results: Vec<Product>, total_found: usize) {
        let mut sessions = self.inner.lock().await;
        sessions.insert(
            session_id.to_string(),
            StoredSession {
                results,
                total_found,
                created: Instant::now(),
            },
        );
        while sessions.len() > self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.created)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Fetch a slice of a stored session. Missing or expired sessions yield
    /// an empty page, never an error.
    pub async fn fetch(&self, session_id: &str, offset: usize, limit: usize) -> SessionPage {
        let mut sessions = self.inner.lock().await;
        let Some(stored) = sessions.get(session_id) else {
            return SessionPage::default();
        };
        if stored.created.elapsed() > self.ttl {
            sessions.remove(session_id);
            return SessionPage::default();
        }

        let end = (offset + limit).min(stored.results.len());
        let products = stored
            .results
            .get(offset..end)
            .map(<[Product]>::to_vec)
            .unwrap_or_default();
        SessionPage {
            products,
            next_offset: end,
            has_more: end < stored.results.len(),
            total_found: stored.total_found,
        }
    }

    pub async fn clear(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    /// Drop expired sessions, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.inner.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.created.elapsed() <= self.ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Swept expired search sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Process-wide record of performed searches, bounded and TTL-swept.
/// Classification uses the history the client sends per request; this list
/// feeds the operational endpoints and the janitor.
pub struct SearchHistory {
    max_items: usize,
    ttl: Duration,
    inner: Mutex<Vec<SearchHistoryItem>>,
}

impl SearchHistory {
    pub fn new(max_items: usize, ttl: Duration) -> Self {
        Self {
            max_items: max_items.max(1),
            ttl,
            inner: Mutex::new(Vec::new()),
        }
    }

    pub async fn add(&self, query: &str, keywords: Vec<String>, results_count: usize) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let mut history = self.inner.lock().await;
        history.push(SearchHistoryItem {
            query: query.to_string(),
            keywords,
            timestamp,
            results_count,
        });
        let len = history.len();
        if len > self.max_items {
            history.drain(..len - self.max_items);
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<SearchHistoryItem> {
        let history = self.inner.lock().await;
        history.iter().rev().take(limit).rev().cloned().collect()
    }

    /// Drop items older than the TTL, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let ttl = self.ttl.as_secs_f64();
        let mut history = self.inner.lock().await;
        let before = history.len();
        history.retain(|item| now - item.timestamp < ttl);
        before - history.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: id.into(),
            score: 1.0,
            title_ua: None,
            title_ru: None,
            description_ua: None,
            description_ru: None,
            sku: None,
            good_code: None,
            uktzed: None,
            measurement_unit_ua: None,
            vat: None,
            discounted: None,
            height: None,
            width: None,
            length: None,
            weight: None,
            availability: true,
            highlight: None,
        }
    }

    fn products(n: usize) -> Vec<Product> {
        (0..n).map(|i| product(&format!("p{i}"))).collect()
    }

    #[tokio::test]
    async fn test_store_fetch_roundtrip() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        store.store("s1", products(5), 5).await;

        let page = store.fetch("s1", 0, 100).await;
        assert_eq!(page.products.len(), 5);
        assert_eq!(page.total_found, 5);
        assert!(!page.has_more);
        assert_eq!(
            page.products.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            ["p0", "p1", "p2", "p3", "p4"]
        );
    }

    #[tokio::test]
    async fn test_fetch_pagination() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        store.store("s1", products(50), 50).await;

        let page = store.fetch("s1", 20, 20).await;
        assert_eq!(page.products.len(), 20);
        assert_eq!(page.products[0].id, "p20");
        assert_eq!(page.next_offset, 40);
        assert!(page.has_more);

        let page = store.fetch("s1", 40, 20).await;
        assert_eq!(page.products.len(), 10);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_fetch_missing_session_is_empty() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        let page = store.fetch("nope", 0, 20).await;
        assert!(page.products.is_empty());
        assert_eq!(page.total_found, 0);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_fetch_offset_beyond_end() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        store.store("s1", products(5), 5).await;
        let page = store.fetch("s1", 100, 20).await;
        assert!(page.products.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total_found, 5);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let store = SessionStore::new(2, Duration::from_secs(60));
        store.store("old", products(1), 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("mid", products(1), 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store("new", products(1), 1).await;

        assert_eq!(store.len().await, 2);
        assert!(store.fetch("old", 0, 1).await.products.is_empty());
        assert!(!store.fetch("new", 0, 1).await.products.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_empty_and_swept() {
        let store = SessionStore::new(10, Duration::from_millis(10));
        store.store("s1", products(3), 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.fetch("s1", 0, 10).await.products.is_empty());

        store.store("s2", products(3), 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.sweep_expired().await, 1);
    }

    #[tokio::test]
    async fn test_latest_write_wins() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        store.store("s1", products(3), 3).await;
        store.store("s1", products(7), 7).await;
        assert_eq!(store.fetch("s1", 0, 100).await.products.len(), 7);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let history = SearchHistory::new(3, Duration::from_secs(60));
        for i in 0..5 {
            history.add(&format!("q{i}"), vec![], i).await;
        }
        assert_eq!(history.len().await, 3);
        let recent = history.recent(10).await;
        assert_eq!(recent[0].query, "q2");
        assert_eq!(recent[2].query, "q4");
    }

    #[tokio::test]
    async fn test_history_recent_limit() {
        let history = SearchHistory::new(10, Duration::from_secs(60));
        for i in 0..5 {
            history.add(&format!("q{i}"), vec![], 0).await;
        }
        let recent = history.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].query, "q4");
    }
}
