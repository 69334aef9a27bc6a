use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::enrich::{Enricher, EntityTagger};
use crate::fetcher::ContentFetcher;
use crate::index::KnownItemIndex;
use crate::notify::{self, Notifier};
use crate::parser;
use crate::resolver::IdentityResolver;
use crate::snapshot::{SnapshotPublisher, ViewMaterializer};
use crate::store::{ItemStore, QueryScope};
use crate::types::{EnrichedItem, FeedSource, IngestError, RawEntry, Resolved, Result, RunSummary, StoredItem};
use crate::writer::{PersistenceWriter, WriteOutcome};

/// Drives one ingestion run: index load, per-feed pipelines under a bounded
/// worker pool, then snapshot materialization for touched categories.
///
/// All collaborators are owned by the runner and scoped to it; nothing is
/// process-global, so concurrent runners (e.g. in tests) cannot interfere.
pub struct IngestRunner {
    store: Arc<dyn ItemStore>,
    fetcher: Arc<dyn ContentFetcher>,
    tagger: Arc<dyn EntityTagger>,
    notifier: Option<Arc<dyn Notifier>>,
    publisher: Option<Arc<dyn SnapshotPublisher>>,
    config: RunConfig,
}

impl IngestRunner {
    pub fn new(
        store: Arc<dyn ItemStore>,
        fetcher: Arc<dyn ContentFetcher>,
        tagger: Arc<dyn EntityTagger>,
        config: RunConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            tagger,
            notifier: None,
            publisher: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn SnapshotPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let now = Utc::now();
        let horizon = self.config.horizon(now.timestamp());

        info!(
            "run {} starting: {} feeds, lookback {} days, {} workers",
            run_id,
            self.config.feeds.len(),
            self.config.lookback_days,
            self.config.workers()
        );

        // Index load failure is fatal: deciding "new" against a partial
        // index would repeat side effects, so the run fails closed.
        let index = KnownItemIndex::load(&self.store, QueryScope::AllVisible, horizon).await?;
        let index = Arc::new(Mutex::new(index));
        let touched = Arc::new(Mutex::new(BTreeSet::new()));

        let writer = Arc::new(PersistenceWriter::new(
            self.store.clone(),
            index.clone(),
            touched.clone(),
        ));
        let enricher = Arc::new(Enricher::new(self.fetcher.clone(), self.tagger.clone()));

        let mut summary = RunSummary::default();

        // One absolute deadline shared by every worker, not a per-feed
        // budget: a worker still suspended when it passes is aborted.
        let deadline_at = self
            .config
            .deadline_secs
            .map(|secs| (secs, Instant::now() + Duration::from_secs(secs)));

        let results: Vec<(String, Result<usize>)> = stream::iter(self.config.feeds.clone())
            .map(|feed| {
                let fetcher = self.fetcher.clone();
                let enricher = enricher.clone();
                let writer = writer.clone();
                let index = index.clone();
                let notifier = self.notifier.clone();
                let recipient = self.config.notify_recipient.clone();
                let notify_enabled = self.config.notify_enabled;

                async move {
                    let category = feed.category.clone();
                    let pipeline = process_feed(
                        feed,
                        fetcher,
                        enricher,
                        writer,
                        index,
                        notifier.filter(|_| notify_enabled),
                        recipient,
                        now,
                        horizon,
                    );

                    let outcome = match deadline_at {
                        Some((secs, at)) => match tokio::time::timeout_at(at, pipeline).await {
                            Ok(result) => result,
                            Err(_) => Err(IngestError::Deadline(secs)),
                        },
                        None => pipeline.await,
                    };

                    (category, outcome)
                }
            })
            .buffer_unordered(self.config.workers())
            .collect()
            .await;

        for (category, outcome) in results {
            match outcome {
                Ok(new_items) => summary.new_item_count += new_items,
                Err(e) => {
                    error!("feed {} failed: {}", category, e);
                    summary.per_feed_errors.insert(category, e.to_string());
                }
            }
        }

        summary.touched_categories = touched.lock().await.clone();

        if self.config.publish_enabled {
            if let Some(publisher) = &self.publisher {
                let materializer =
                    ViewMaterializer::new(self.store.clone(), publisher.clone(), horizon);

                for category in summary.touched_categories.clone() {
                    if let Err(e) = materializer.rebuild(&category).await {
                        error!("snapshot rebuild for {} failed: {}", category, e);
                        summary
                            .per_feed_errors
                            .entry(category)
                            .and_modify(|msg| *msg = format!("{msg}; {e}"))
                            .or_insert_with(|| e.to_string());
                    }
                }
            }
        }

        info!(
            "run {} done: {} new items, {} touched categories, {} feed errors",
            run_id,
            summary.new_item_count,
            summary.touched_categories.len(),
            summary.per_feed_errors.len()
        );
        Ok(summary)
    }
}

/// One feed's pipeline, executed sequentially in feed order. Entry-level
/// problems (enrichment, store write) are logged and skipped; only fetch
/// and parse failures abort the feed.
#[allow(clippy::too_many_arguments)]
async fn process_feed(
    feed: FeedSource,
    fetcher: Arc<dyn ContentFetcher>,
    enricher: Arc<Enricher>,
    writer: Arc<PersistenceWriter>,
    index: Arc<Mutex<KnownItemIndex>>,
    notifier: Option<Arc<dyn Notifier>>,
    recipient: Option<String>,
    now: DateTime<Utc>,
    horizon: i64,
) -> Result<usize> {
    let content = fetcher.fetch_feed(&feed.url).await?;
    let entries = parser::parse_feed(&feed, &content)?;
    let mut resolver = IdentityResolver::new(now);
    let mut new_items = 0usize;

    for entry in entries {
        let resolved = resolver.resolve(&entry);

        if resolved.timestamp <= horizon {
            continue;
        }

        // Cheap pre-check; the writer re-checks under the same lock before
        // writing, so a racing cross-post still resolves to one winner.
        if index.lock().await.contains(&resolved.identity) {
            continue;
        }

        let enriched = match enricher.enrich(&entry).await {
            Ok(enriched) => enriched,
            Err(e) => {
                // Not persisted and not marked known: retried next run.
                warn!("enrichment failed for {}: {}", entry.link, e);
                continue;
            }
        };

        let item = build_item(&entry, &resolved, enriched);

        match writer.persist(&item).await {
            Ok(WriteOutcome::Inserted) => {
                new_items += 1;
                if let (Some(notifier), Some(recipient)) = (&notifier, &recipient) {
                    let (subject, body) = notify::compose(&item);
                    if let Err(e) = notifier.send(recipient, &subject, &body).await {
                        // Best-effort: the item is already durable.
                        warn!("notification failed for {}: {}", item.identity, e);
                    }
                }
            }
            Ok(WriteOutcome::AlreadyKnown) => {}
            Err(e) => {
                warn!("persist failed for {}: {}", item.identity, e);
            }
        }
    }

    info!("feed {} contributed {} new items", feed.category, new_items);
    Ok(new_items)
}

fn build_item(entry: &RawEntry, resolved: &Resolved, enriched: EnrichedItem) -> StoredItem {
    let datestr = Utc
        .timestamp_opt(resolved.timestamp, 0)
        .single()
        .map(|dt| dt.format("%d-%m-%Y %H:%M").to_string())
        .unwrap_or_default();

    let tags_lower = enriched.tags.iter().map(|t| t.to_lowercase()).collect();

    StoredItem {
        identity: resolved.identity.clone(),
        category: entry.category.clone(),
        timestamp: resolved.timestamp,
        datestr,
        title: entry.title.clone(),
        description: enriched.description,
        clean_text: enriched.clean_text,
        raw_html: enriched.raw_html,
        link: entry.link.clone(),
        author: entry.author.clone().unwrap_or_else(|| "blank".to_string()),
        tags: enriched.tags,
        tags_lower,
        category_terms: enriched.category_terms,
        visible: true,
    }
}
