use std::path::Path;

use crate::types::{FeedSource, IngestError, Result};

/// Hard ceiling on concurrent feed pipelines, regardless of configuration.
pub const MAX_WORKERS: usize = 50;

/// Input contract for one ingestion run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// How many days back an entry may be published and still count as new.
    pub lookback_days: u32,
    pub notify_enabled: bool,
    pub notify_recipient: Option<String>,
    pub publish_enabled: bool,
    /// Worker pool size; clamped to [`MAX_WORKERS`].
    pub max_concurrency: usize,
    /// Optional run-level deadline; workers still suspended past it are
    /// aborted and their feeds recorded as isolated failures.
    pub deadline_secs: Option<u64>,
    pub feeds: Vec<FeedSource>,
}

impl RunConfig {
    pub fn new(lookback_days: u32, feeds: Vec<FeedSource>) -> Self {
        Self {
            lookback_days,
            notify_enabled: false,
            notify_recipient: None,
            publish_enabled: false,
            max_concurrency: MAX_WORKERS,
            deadline_secs: None,
            feeds,
        }
    }

    pub fn workers(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_WORKERS)
    }

    /// Epoch-seconds cutoff below which entries are too old to ingest.
    pub fn horizon(&self, now: i64) -> i64 {
        now - i64::from(self.lookback_days) * 86_400
    }
}

/// Parse a feeds file with one `category,url` pair per line.
/// Blank lines and `#` comments are skipped; a line without a comma is an
/// error rather than a silently dropped feed.
pub fn parse_feeds(content: &str) -> Result<Vec<FeedSource>> {
    let mut feeds = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (category, url) = line.split_once(',').ok_or_else(|| {
            IngestError::General(format!("feeds file line {}: expected 'category,url'", lineno + 1))
        })?;

        let category = category.trim();
        let url = url.trim();
        if category.is_empty() || url.is_empty() {
            return Err(IngestError::General(format!(
                "feeds file line {}: empty category or url",
                lineno + 1
            )));
        }

        feeds.push(FeedSource {
            category: category.to_string(),
            url: url.to_string(),
        });
    }

    Ok(feeds)
}

pub fn load_feeds(path: &Path) -> Result<Vec<FeedSource>> {
    let content = std::fs::read_to_string(path)?;
    parse_feeds(&content)
}

/// SMTP settings for the email notifier, read from the environment.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub pass: String,
    pub from: String,
}

impl SmtpConfig {
    /// Returns `None` when SMTP_HOST is unset (notification not configured),
    /// an error when the configuration is only half present.
    pub fn from_env() -> Result<Option<Self>> {
        let host = match std::env::var("SMTP_HOST") {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };

        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| IngestError::General(format!("SMTP_HOST is set but {name} is missing")))
        };

        Ok(Some(Self {
            host,
            user: var("SMTP_USER")?,
            pass: var("SMTP_PASS")?,
            from: var("NOTIFY_EMAIL_FROM")?,
        }))
    }
}
