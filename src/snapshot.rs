use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::store::{ItemStore, QueryScope};
use crate::types::{IngestError, Result, SnapshotEntry};
use crate::writer::ALL_CATEGORY;

/// Object publication boundary for category snapshots. `fetch` reads the
/// previously published object (for incremental merge); `publish` replaces
/// it atomically.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn publish(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Rebuilds the denormalized newest-first listing for one category.
pub struct ViewMaterializer {
    store: Arc<dyn ItemStore>,
    publisher: Arc<dyn SnapshotPublisher>,
    lookback_horizon: i64,
}

impl ViewMaterializer {
    pub fn new(
        store: Arc<dyn ItemStore>,
        publisher: Arc<dyn SnapshotPublisher>,
        lookback_horizon: i64,
    ) -> Self {
        Self { store, publisher, lookback_horizon }
    }

    /// Query fresh items inside the lookback horizon, merge in previous
    /// snapshot entries whose identities the fresh result does not cover
    /// (older items are preserved, never re-verified), sort newest-first,
    /// publish as one JSON object.
    pub async fn rebuild(&self, category: &str) -> Result<usize> {
        let scope = if category == ALL_CATEGORY {
            QueryScope::AllVisible
        } else {
            QueryScope::Category(category.to_string())
        };

        let mut entries: Vec<SnapshotEntry> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = None;

        loop {
            let page = self
                .store
                .query(scope.clone(), self.lookback_horizon, cursor)
                .await?;

            for item in &page.items {
                // Pages may repeat items; first occurrence wins.
                if seen.insert(item.identity.clone()) {
                    entries.push(SnapshotEntry::from(item));
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let key = format!("{category}.json");
        for previous in self.previous_entries(&key).await {
            if !seen.contains(&previous.identity) {
                entries.push(previous);
            }
        }

        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        let count = entries.len();
        let bytes = serde_json::to_vec(&entries)?;
        self.publisher
            .publish(&key, bytes, "application/json")
            .await
            .map_err(|e| IngestError::Publish(format!("{key}: {e}")))?;

        info!("published snapshot {} with {} entries", key, count);
        Ok(count)
    }

    /// Entries of the previously published snapshot. An unreadable or
    /// unparseable object degrades to a fresh-only rebuild.
    async fn previous_entries(&self, key: &str) -> Vec<SnapshotEntry> {
        match self.publisher.fetch(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("previous snapshot {} unparseable, rebuilding fresh: {}", key, e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("previous snapshot {} unreadable, rebuilding fresh: {}", key, e);
                Vec::new()
            }
        }
    }
}

/// Directory-backed publisher. The write goes to a temp file first and is
/// renamed over the target, so consumers always see a complete object.
pub struct FsPublisher {
    dir: PathBuf,
}

impl FsPublisher {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl SnapshotPublisher for FsPublisher {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.dir.join(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::Publish(format!("read {key}: {e}"))),
        }
    }

    async fn publish(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::Publish(format!("create dir: {e}")))?;

        let target = self.dir.join(key);
        let tmp = self.dir.join(format!("{key}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| IngestError::Publish(format!("write {key}: {e}")))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| IngestError::Publish(format!("replace {key}: {e}")))?;

        Ok(())
    }
}
