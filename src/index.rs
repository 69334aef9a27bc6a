use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::{ItemStore, QueryScope};
use crate::types::{IngestError, Result};

/// Attempts per page before the whole load is abandoned.
const PAGE_ATTEMPTS: u32 = 3;
const PAGE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The set of identities already persisted, rebuilt once per run.
///
/// An identity present here is never re-enriched, re-persisted, or
/// re-notified. The load fails closed: a page that cannot be fetched after
/// bounded retries aborts the run rather than risking duplicate side
/// effects from a partial index.
#[derive(Debug, Default)]
pub struct KnownItemIndex {
    identities: HashSet<String>,
}

impl KnownItemIndex {
    pub async fn load(
        store: &Arc<dyn ItemStore>,
        scope: QueryScope,
        since: i64,
    ) -> Result<Self> {
        let mut identities = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = Self::load_page(store, &scope, since, cursor.clone()).await?;
            pages += 1;

            for item in &page.items {
                // Stores may repeat keys across inconsistent pages; the set
                // absorbs them.
                identities.insert(item.identity.clone());
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!("known-item index loaded: {} identities over {} pages", identities.len(), pages);
        Ok(Self { identities })
    }

    async fn load_page(
        store: &Arc<dyn ItemStore>,
        scope: &QueryScope,
        since: i64,
        cursor: Option<String>,
    ) -> Result<crate::store::QueryPage> {
        let mut last_error = None;

        for attempt in 1..=PAGE_ATTEMPTS {
            match store.query(scope.clone(), since, cursor.clone()).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    warn!("index page fetch attempt {}/{} failed: {}", attempt, PAGE_ATTEMPTS, e);
                    last_error = Some(e);
                    if attempt < PAGE_ATTEMPTS {
                        tokio::time::sleep(PAGE_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(IngestError::StoreRead(format!(
            "index load aborted after {} attempts: {}",
            PAGE_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    /// Returns true when the identity was not yet known.
    pub fn insert(&mut self, identity: String) -> bool {
        self.identities.insert(identity)
    }

    pub fn remove(&mut self, identity: &str) {
        self.identities.remove(identity);
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::StoredItem;

    fn item(identity: &str, ts: i64) -> StoredItem {
        StoredItem {
            identity: identity.to_string(),
            category: "security".to_string(),
            timestamp: ts,
            datestr: "01-01-2026 00:00".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            clean_text: "c".to_string(),
            raw_html: "<p>c</p>".to_string(),
            link: format!("https://example.com/{identity}"),
            author: "blank".to_string(),
            tags: vec!["none".to_string()],
            tags_lower: vec!["none".to_string()],
            category_terms: vec!["none".to_string()],
            visible: true,
        }
    }

    #[tokio::test]
    async fn deduplicates_identities_across_overlapping_pages() {
        let store = MemoryStore::with_page_size(2).with_page_overlap(1);
        for i in 0..5 {
            store.put(&item(&format!("g{i}"), 100 + i)).await.unwrap();
        }

        let store: Arc<dyn ItemStore> = Arc::new(store);
        let index = KnownItemIndex::load(&store, QueryScope::AllVisible, 0)
            .await
            .unwrap();

        assert_eq!(index.len(), 5);
        for i in 0..5 {
            assert!(index.contains(&format!("g{i}")));
        }
    }

    #[tokio::test]
    async fn transient_page_failure_is_retried() {
        let store = MemoryStore::with_page_size(2);
        for i in 0..3 {
            store.put(&item(&format!("g{i}"), 100 + i)).await.unwrap();
        }
        store.fail_queries(1);

        let store: Arc<dyn ItemStore> = Arc::new(store);
        let index = KnownItemIndex::load(&store, QueryScope::AllVisible, 0)
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn persistent_failure_fails_closed() {
        let store = MemoryStore::new();
        store.put(&item("g0", 100)).await.unwrap();
        store.fail_queries(PAGE_ATTEMPTS as usize);

        let store: Arc<dyn ItemStore> = Arc::new(store);
        let err = KnownItemIndex::load(&store, QueryScope::AllVisible, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StoreRead(_)));
    }

    #[tokio::test]
    async fn lookback_horizon_scopes_the_load() {
        let store = MemoryStore::new();
        store.put(&item("old", 50)).await.unwrap();
        store.put(&item("new", 150)).await.unwrap();

        let store: Arc<dyn ItemStore> = Arc::new(store);
        let index = KnownItemIndex::load(&store, QueryScope::AllVisible, 100)
            .await
            .unwrap();
        assert!(index.contains("new"));
        assert!(!index.contains("old"));
    }
}
