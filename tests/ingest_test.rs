use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

use rss_ingestor::{
    ContentFetcher, FeedSource, FsPublisher, IngestError, IngestRunner, MemoryStore, MockTagger,
    Notifier, NoopTagger, Result, RunConfig,
};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

/// Serves canned feed documents and article pages. Individual article URLs
/// can be made to fail (enrichment isolation) and individual feeds can be
/// made to hang (deadline behavior).
struct StaticFetcher {
    feeds: HashMap<String, String>,
    failing_articles: Mutex<HashSet<String>>,
    hanging_feeds: Mutex<HashSet<String>>,
}

impl StaticFetcher {
    fn new(feeds: Vec<(&str, String)>) -> Self {
        Self {
            feeds: feeds
                .into_iter()
                .map(|(url, body)| (url.to_string(), body))
                .collect(),
            failing_articles: Mutex::new(HashSet::new()),
            hanging_feeds: Mutex::new(HashSet::new()),
        }
    }

    async fn fail_article(&self, url: &str) {
        self.failing_articles.lock().await.insert(url.to_string());
    }

    async fn restore_article(&self, url: &str) {
        self.failing_articles.lock().await.remove(url);
    }

    async fn hang_feed(&self, url: &str) {
        self.hanging_feeds.lock().await.insert(url.to_string());
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch_feed(&self, url: &str) -> Result<String> {
        if self.hanging_feeds.lock().await.contains(url) {
            tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        }
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| IngestError::Fetch(format!("unknown feed {url}")))
    }

    async fn fetch_article(&self, url: &str) -> Result<String> {
        if self.failing_articles.lock().await.contains(url) {
            return Err(IngestError::Fetch(format!("article unavailable: {url}")));
        }
        Ok(format!(
            "<html><body><article><p>Body text for {url}</p></article></body></html>"
        ))
    }
}

/// Records every delivered notification.
#[derive(Default)]
struct CountingNotifier {
    sent: AtomicUsize,
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send(&self, _recipient: &str, subject: &str, _html_body: &str) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.subjects.lock().await.push(subject.to_string());
        Ok(())
    }
}

fn rss_item(guid: &str, title: &str, link: &str, pub_date: &str) -> String {
    format!(
        "<item><guid>{guid}</guid><title>{title}</title><link>{link}</link>\
         <description>&lt;p&gt;short&lt;/p&gt;</description>\
         <pubDate>{pub_date}</pubDate></item>"
    )
}

fn rss_feed(title: &str, items: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>{title}</title>{}</channel></rss>",
        items.join("")
    )
}

const FEED_URL: &str = "https://example.com/security/feed";
const DATE_A: &str = "Tue, 04 Aug 2026 10:00:00 GMT";
const DATE_B: &str = "Tue, 04 Aug 2026 11:00:00 GMT";

fn security_feed_two_items() -> String {
    rss_feed(
        "Security Blog",
        &[
            rss_item("g1", "First post", "https://example.com/p/1", DATE_A),
            rss_item("g2", "Second post", "https://example.com/p/2", DATE_B),
        ],
    )
}

fn config_for(feeds: Vec<FeedSource>) -> RunConfig {
    // A generous lookback keeps the fixed test dates inside the horizon.
    let mut config = RunConfig::new(36_500, feeds);
    config.notify_enabled = true;
    config.notify_recipient = Some("ops@example.com".to_string());
    config
}

fn security_source() -> FeedSource {
    FeedSource {
        category: "security".to_string(),
        url: FEED_URL.to_string(),
    }
}

#[tokio::test]
async fn two_new_items_are_persisted_touched_and_notified() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));
    let notifier = Arc::new(CountingNotifier::default());

    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(vec![security_source()]),
    )
    .with_notifier(notifier.clone());

    let summary = runner.run().await.unwrap();

    assert_eq!(summary.new_item_count, 2);
    assert!(summary.per_feed_errors.is_empty());
    assert_eq!(
        summary.touched_categories.iter().collect::<Vec<_>>(),
        vec!["all", "security"]
    );

    let g1 = store.get("g1").await.unwrap();
    assert!(g1.visible);
    assert_eq!(g1.category, "security");
    assert_eq!(g1.description, "short");
    assert_eq!(g1.tags, vec!["none"]);
    assert!(g1.clean_text.contains("Body text for https://example.com/p/1"));

    assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
    let subjects = notifier.subjects.lock().await;
    assert!(subjects.contains(&"SECURITY - First post".to_string()));
}

#[tokio::test]
async fn second_run_with_no_new_content_is_a_noop() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));
    let notifier = Arc::new(CountingNotifier::default());

    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(vec![security_source()]),
    )
    .with_notifier(notifier.clone());

    let first = runner.run().await.unwrap();
    assert_eq!(first.new_item_count, 2);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);

    let second = runner.run().await.unwrap();
    assert_eq!(second.new_item_count, 0);
    assert!(second.touched_categories.is_empty());
    assert_eq!(store.len().await, 2);
    // No notifications on the second run.
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cross_posted_guid_is_stored_and_notified_once() {
    init_tracing();

    let crosspost = rss_item("shared-guid", "Cross post", "https://example.com/p/x", DATE_A);
    let feed_a = rss_feed("A", &[crosspost.clone()]);
    let feed_b = rss_feed("B", &[crosspost]);

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![
        ("https://example.com/a/feed", feed_a),
        ("https://example.com/b/feed", feed_b),
    ]));
    let notifier = Arc::new(CountingNotifier::default());

    let feeds = vec![
        FeedSource {
            category: "devops".to_string(),
            url: "https://example.com/a/feed".to_string(),
        },
        FeedSource {
            category: "compute".to_string(),
            url: "https://example.com/b/feed".to_string(),
        },
    ];

    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(feeds),
    )
    .with_notifier(notifier.clone());

    let summary = runner.run().await.unwrap();

    assert_eq!(summary.new_item_count, 1);
    assert_eq!(store.len().await, 1);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn colliding_timestamps_resolve_distinct_and_ordered() {
    init_tracing();

    let feed = rss_feed(
        "Security Blog",
        &[
            rss_item("c1", "One", "https://example.com/c/1", DATE_A),
            rss_item("c2", "Two", "https://example.com/c/2", DATE_A),
            rss_item("c3", "Three", "https://example.com/c/3", DATE_A),
        ],
    );

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, feed)]));
    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(vec![security_source()]),
    );

    runner.run().await.unwrap();

    let base = Utc
        .with_ymd_and_hms(2026, 8, 4, 10, 0, 0)
        .unwrap()
        .timestamp();
    assert_eq!(store.get("c1").await.unwrap().timestamp, base);
    assert_eq!(store.get("c2").await.unwrap().timestamp, base + 1);
    assert_eq!(store.get("c3").await.unwrap().timestamp, base + 2);
}

#[tokio::test]
async fn enrichment_failure_isolates_the_item_and_retries_next_run() {
    init_tracing();

    let items: Vec<String> = (1..=5)
        .map(|i| {
            rss_item(
                &format!("g{i}"),
                &format!("Post {i}"),
                &format!("https://example.com/p/{i}"),
                DATE_A,
            )
        })
        .collect();
    let feed = rss_feed("Security Blog", &items);

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, feed)]));
    fetcher.fail_article("https://example.com/p/3").await;

    let runner = IngestRunner::new(
        store.clone(),
        fetcher.clone(),
        Arc::new(NoopTagger),
        config_for(vec![security_source()]),
    );

    let first = runner.run().await.unwrap();
    assert_eq!(first.new_item_count, 4);
    // The feed itself did not fail.
    assert!(first.per_feed_errors.is_empty());
    assert!(store.get("g3").await.is_none());

    // The article recovers; the next run picks the item up.
    fetcher.restore_article("https://example.com/p/3").await;
    let second = runner.run().await.unwrap();
    assert_eq!(second.new_item_count, 1);
    assert!(store.get("g3").await.is_some());
}

#[tokio::test]
async fn failing_feed_does_not_cancel_its_siblings() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));

    let feeds = vec![
        security_source(),
        FeedSource {
            category: "devops".to_string(),
            url: "https://example.com/missing/feed".to_string(),
        },
    ];

    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(feeds),
    );

    let summary = runner.run().await.unwrap();

    assert_eq!(summary.new_item_count, 2);
    assert_eq!(summary.per_feed_errors.len(), 1);
    assert!(summary.per_feed_errors.contains_key("devops"));
    assert!(summary.touched_categories.contains("security"));
}

#[tokio::test]
async fn index_load_failure_fails_the_run_closed() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    // Exhaust every retry of the first index page.
    store.fail_queries(10);

    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));
    let runner = IngestRunner::new(
        store.clone(),
        fetcher,
        Arc::new(NoopTagger),
        config_for(vec![security_source()]),
    );

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, IngestError::StoreRead(_)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn publish_writes_snapshots_for_touched_categories_only() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));

    let mut config = config_for(vec![security_source()]);
    config.publish_enabled = true;
    config.notify_enabled = false;

    let runner = IngestRunner::new(store.clone(), fetcher, Arc::new(NoopTagger), config)
        .with_publisher(Arc::new(FsPublisher::new(dir.path().to_path_buf())));

    runner.run().await.unwrap();

    let security: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("security.json")).unwrap()).unwrap();
    let all: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("all.json")).unwrap()).unwrap();

    assert_eq!(security.as_array().unwrap().len(), 2);
    assert_eq!(all.as_array().unwrap().len(), 2);
    // Newest first.
    assert_eq!(security[0]["identity"], "g2");
    assert_eq!(security[1]["identity"], "g1");
}

#[tokio::test]
async fn detected_entities_become_tags_with_lowercase_variant() {
    init_tracing();

    use rss_ingestor::{Entity, EntityKind};

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));
    let tagger = Arc::new(MockTagger::new(vec![
        Entity { text: "Acme Corp".to_string(), kind: EntityKind::Organization },
        Entity { text: "Tuesday".to_string(), kind: EntityKind::Other("DATE".to_string()) },
    ]));

    let mut config = config_for(vec![security_source()]);
    config.notify_enabled = false;

    let runner = IngestRunner::new(store.clone(), fetcher, tagger, config);
    runner.run().await.unwrap();

    let item = store.get("g1").await.unwrap();
    assert_eq!(item.tags, vec!["Acme Corp"]);
    assert_eq!(item.tags_lower, vec!["acme corp"]);
    assert_eq!(item.category_terms, vec!["none"]);
}

#[tokio::test]
async fn deadline_aborts_suspended_feed_without_corrupting_others() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![
        (FEED_URL, security_feed_two_items()),
        ("https://example.com/slow/feed", rss_feed("Slow", &[])),
    ]));
    fetcher.hang_feed("https://example.com/slow/feed").await;

    let feeds = vec![
        security_source(),
        FeedSource {
            category: "devops".to_string(),
            url: "https://example.com/slow/feed".to_string(),
        },
    ];

    let mut config = config_for(feeds);
    config.notify_enabled = false;
    config.deadline_secs = Some(1);

    let runner = IngestRunner::new(store.clone(), fetcher, Arc::new(NoopTagger), config);
    let summary = runner.run().await.unwrap();

    // The fast feed landed in full; the hung one is an isolated failure.
    assert_eq!(summary.new_item_count, 2);
    assert!(summary.per_feed_errors["devops"].contains("deadline"));
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn notifications_are_skipped_when_disabled() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new(vec![(FEED_URL, security_feed_two_items())]));
    let notifier = Arc::new(CountingNotifier::default());

    let mut config = config_for(vec![security_source()]);
    config.notify_enabled = false;

    let runner = IngestRunner::new(store.clone(), fetcher, Arc::new(NoopTagger), config)
        .with_notifier(notifier.clone());

    let summary = runner.run().await.unwrap();
    assert_eq!(summary.new_item_count, 2);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
}
