use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::index::KnownItemIndex;
use crate::store::ItemStore;
use crate::types::{Result, StoredItem};

/// Aggregate category for the combined snapshot.
pub const ALL_CATEGORY: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First sight of this identity; the record was written.
    Inserted,
    /// Another pipeline (or an earlier run) already owns this identity.
    AlreadyKnown,
}

/// Idempotent persistence of enriched items.
///
/// The identity is reserved in the shared known-item index inside one
/// critical section before the store write, so two feeds racing on a
/// cross-posted item agree on a single winner. New-item accounting hangs
/// off that reservation, never off store-level uniqueness.
pub struct PersistenceWriter {
    store: Arc<dyn ItemStore>,
    index: Arc<Mutex<KnownItemIndex>>,
    touched: Arc<Mutex<BTreeSet<String>>>,
}

impl PersistenceWriter {
    pub fn new(
        store: Arc<dyn ItemStore>,
        index: Arc<Mutex<KnownItemIndex>>,
        touched: Arc<Mutex<BTreeSet<String>>>,
    ) -> Self {
        Self { store, index, touched }
    }

    pub async fn persist(&self, item: &StoredItem) -> Result<WriteOutcome> {
        {
            let mut index = self.index.lock().await;
            if !index.insert(item.identity.clone()) {
                debug!("skipping already-known identity {}", item.identity);
                return Ok(WriteOutcome::AlreadyKnown);
            }
        }

        if let Err(e) = self.store.put(item).await {
            // Release the reservation so the item is retried next run.
            self.index.lock().await.remove(&item.identity);
            return Err(e);
        }

        {
            let mut touched = self.touched.lock().await;
            touched.insert(item.category.clone());
            touched.insert(ALL_CATEGORY.to_string());
        }

        info!("persisted {} in {}", item.identity, item.category);
        Ok(WriteOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::IngestError;

    fn item(identity: &str, category: &str) -> StoredItem {
        StoredItem {
            identity: identity.to_string(),
            category: category.to_string(),
            timestamp: 100,
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

    fn writer_over(store: Arc<MemoryStore>) -> PersistenceWriter {
        PersistenceWriter::new(
            store,
            Arc::new(Mutex::new(KnownItemIndex::default())),
            Arc::new(Mutex::new(BTreeSet::new())),
        )
    }

    #[tokio::test]
    async fn first_write_inserts_and_touches() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer_over(store.clone());

        let outcome = writer.persist(&item("g1", "security")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);
        assert_eq!(store.len().await, 1);

        let touched = writer.touched.lock().await;
        assert!(touched.contains("security"));
        assert!(touched.contains(ALL_CATEGORY));
    }

    #[tokio::test]
    async fn second_write_of_same_identity_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer_over(store.clone());

        writer.persist(&item("g1", "security")).await.unwrap();
        let outcome = writer.persist(&item("g1", "compute")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::AlreadyKnown);
        assert_eq!(store.len().await, 1);

        // The losing category was never touched.
        assert!(!writer.touched.lock().await.contains("compute"));
    }

    #[tokio::test]
    async fn failed_put_releases_the_reservation() {
        let store = Arc::new(MemoryStore::new());
        store.fail_puts(1);
        let writer = writer_over(store.clone());

        let err = writer.persist(&item("g1", "security")).await.unwrap_err();
        assert!(matches!(err, IngestError::StoreWrite(_)));
        assert!(writer.touched.lock().await.is_empty());

        // The identity is free again, so a later run can retry.
        let outcome = writer.persist(&item("g1", "security")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);
    }
}
