use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured feed: a logical category mapped to its feed URL.
/// Loaded once at startup and immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub category: String,
    pub url: String,
}

/// A single entry as parsed out of a feed document. Lives for one
/// ingestion pass and is never persisted as-is.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub category: String,
    pub source_url: String,
    /// Feed-supplied guid; empty when the document carried none.
    pub guid: String,
    pub title: String,
    pub link: String,
    /// Publish time as reported by the feed. Feeds routinely omit this,
    /// repeat it across entries, or report it out of order.
    pub published: Option<DateTime<Utc>>,
    pub description: String,
    pub author: Option<String>,
    pub tag_terms: Vec<String>,
}

/// Identity and normalized timestamp assigned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub identity: String,
    pub timestamp: i64,
}

/// Output of the enrichment pipeline for one new item.
#[derive(Debug, Clone)]
pub struct EnrichedItem {
    pub clean_text: String,
    pub raw_html: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_terms: Vec<String>,
}

/// The durable item record. Created exactly once per identity on first
/// sight; insert-only from this engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub identity: String,
    pub category: String,
    pub timestamp: i64,
    pub datestr: String,
    pub title: String,
    pub description: String,
    pub clean_text: String,
    pub raw_html: String,
    pub link: String,
    pub author: String,
    pub tags: Vec<String>,
    pub tags_lower: Vec<String>,
    pub category_terms: Vec<String>,
    pub visible: bool,
}

/// The reduced projection published in category snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub identity: String,
    pub category: String,
    pub timestamp: i64,
    pub datestr: String,
    pub title: String,
    pub author: String,
    pub link: String,
    pub description: String,
}

impl From<&StoredItem> for SnapshotEntry {
    fn from(item: &StoredItem) -> Self {
        Self {
            identity: item.identity.clone(),
            category: item.category.clone(),
            timestamp: item.timestamp,
            datestr: item.datestr.clone(),
            title: item.title.clone(),
            author: item.author.clone(),
            link: item.link.clone(),
            description: item.description.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "rss-ingestor/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 2,
        }
    }
}

/// Result of one orchestrated ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub new_item_count: usize,
    pub touched_categories: std::collections::BTreeSet<String>,
    pub per_feed_errors: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("enrichment error: {0}")]
    Enrichment(String),

    #[error("store read error: {0}")]
    StoreRead(String),

    #[error("store write error: {0}")]
    StoreWrite(String),

    #[error("notification error: {0}")]
    Notify(String),

    #[error("snapshot publish error: {0}")]
    Publish(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run deadline of {0}s exceeded")]
    Deadline(u64),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
