use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ItemStore, QueryPage, QueryScope};
use crate::types::{IngestError, Result, StoredItem};

/// In-memory [`ItemStore`] for tests and local experiments.
///
/// Pagination is real (fixed page size, opaque offset cursor) and can be
/// made adversarial: `page_overlap` repeats trailing items on the next page
/// the way an eventually-consistent store may, and `fail_queries` makes the
/// next N query calls fail to exercise retry and fail-closed paths.
pub struct MemoryStore {
    items: RwLock<Vec<StoredItem>>,
    page_size: usize,
    page_overlap: usize,
    query_failures: AtomicUsize,
    put_failures: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            page_size: page_size.max(1),
            page_overlap: 0,
            query_failures: AtomicUsize::new(0),
            put_failures: AtomicUsize::new(0),
        }
    }

    /// Repeat the last `overlap` items of each page at the start of the next.
    pub fn with_page_overlap(mut self, overlap: usize) -> Self {
        self.page_overlap = overlap.min(self.page_size.saturating_sub(1));
        self
    }

    /// Make the next `n` query calls fail with a store read error.
    pub fn fail_queries(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` put calls fail with a store write error.
    pub fn fail_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub async fn get(&self, identity: &str) -> Option<StoredItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|i| i.identity == identity)
            .cloned()
    }

    fn consume_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn put(&self, item: &StoredItem) -> Result<()> {
        if Self::consume_failure(&self.put_failures) {
            return Err(IngestError::StoreWrite("injected put failure".to_string()));
        }

        let mut items = self.items.write().await;
        if items.iter().any(|i| i.identity == item.identity) {
            // Overwrite-idempotent: the record already exists, keep it.
            return Ok(());
        }
        items.push(item.clone());
        Ok(())
    }

    async fn query(
        &self,
        scope: QueryScope,
        since: i64,
        cursor: Option<String>,
    ) -> Result<QueryPage> {
        if Self::consume_failure(&self.query_failures) {
            return Err(IngestError::StoreRead("injected query failure".to_string()));
        }

        let items = self.items.read().await;
        let mut matching: Vec<&StoredItem> = items
            .iter()
            .filter(|i| i.timestamp > since)
            .filter(|i| match &scope {
                QueryScope::Category(c) => &i.category == c,
                QueryScope::AllVisible => i.visible,
            })
            .collect();
        matching.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        let offset: usize = cursor
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|_| IngestError::StoreRead("malformed cursor".to_string()))?
            .unwrap_or(0);

        let start = offset.saturating_sub(if offset > 0 { self.page_overlap } else { 0 });
        let page: Vec<StoredItem> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|i| (*i).clone())
            .collect();

        let consumed = start + page.len();
        let next_cursor = if consumed < matching.len() {
            Some(consumed.to_string())
        } else {
            None
        };

        Ok(QueryPage {
            items: page,
            next_cursor,
        })
    }
}
