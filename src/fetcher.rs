use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use tracing::{debug, warn};

use crate::types::{FetchConfig, IngestError, Result};

/// Network boundary for both feed documents and full article bodies.
/// Behind a trait so pipelines can run against canned content in tests.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_feed(&self, url: &str) -> Result<String>;
    async fn fetch_article(&self, url: &str) -> Result<String>;
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, config })
    }

    /// GET a URL with bounded retries and exponential backoff. Non-2xx
    /// statuses count as attempts; the last error surfaces when the retry
    /// budget runs out.
    async fn get_with_retries(&self, url: &str) -> Result<String> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 16),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = String::from("no attempts made");

        for attempt in 0..=self.config.max_retries {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.text().await {
                            Ok(body) => {
                                debug!("fetched {} ({} bytes)", url, body.len());
                                return Ok(body);
                            }
                            Err(e) => {
                                last_error = e.to_string();
                            }
                        }
                    } else {
                        last_error = format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("unknown")
                        );
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        }

        Err(IngestError::Fetch(format!(
            "{} failed after {} attempts: {}",
            url,
            self.config.max_retries + 1,
            last_error
        )))
    }
}

#[async_trait]
impl ContentFetcher for Fetcher {
    async fn fetch_feed(&self, url: &str) -> Result<String> {
        self.get_with_retries(url).await
    }

    async fn fetch_article(&self, url: &str) -> Result<String> {
        self.get_with_retries(url).await
    }
}
