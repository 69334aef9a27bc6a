use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

use crate::fetcher::ContentFetcher;
use crate::sanitize;
use crate::types::{EnrichedItem, IngestError, RawEntry, Result};

/// Byte ceiling accepted by the entity tagging service.
pub const TAGGER_BYTE_LIMIT: usize = 5000;

/// Sentinel used when tagging or taxonomy yields nothing; downstream
/// indexing assumes these lists are never empty.
pub const NO_TAGS: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Organization,
    Title,
    CommercialItem,
    Person,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
}

/// Named-entity detection service boundary.
#[async_trait]
pub trait EntityTagger: Send + Sync {
    async fn detect_entities(&self, text: &str, language: &str) -> Result<Vec<Entity>>;
}

/// Tagger binding for deployments without an entity service; every item
/// gets the sentinel tag.
pub struct NoopTagger;

#[async_trait]
impl EntityTagger for NoopTagger {
    async fn detect_entities(&self, _text: &str, _language: &str) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}

/// Canned tagger for tests.
pub struct MockTagger {
    entities: Vec<Entity>,
}

impl MockTagger {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl EntityTagger for MockTagger {
    async fn detect_entities(&self, _text: &str, _language: &str) -> Result<Vec<Entity>> {
        Ok(self.entities.clone())
    }
}

/// Per-item enrichment: article fetch, readable-text extraction,
/// description cleanup, entity tagging, taxonomy terms. Every step failure
/// is scoped to the single item; siblings in the same feed continue.
pub struct Enricher {
    fetcher: Arc<dyn ContentFetcher>,
    tagger: Arc<dyn EntityTagger>,
}

impl Enricher {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, tagger: Arc<dyn EntityTagger>) -> Self {
        Self { fetcher, tagger }
    }

    pub async fn enrich(&self, entry: &RawEntry) -> Result<EnrichedItem> {
        let article = self
            .fetcher
            .fetch_article(&entry.link)
            .await
            .map_err(|e| IngestError::Enrichment(format!("article fetch {}: {e}", entry.link)))?;

        let (raw_html, clean_text) = extract_readable(&article);
        debug!("extracted {} bytes of text from {}", clean_text.len(), entry.link);

        let description = {
            let cleaned = sanitize::clean_description(&entry.description);
            if cleaned.is_empty() {
                // Placeholder so downstream rendering never chokes on an
                // absent description.
                "...".to_string()
            } else {
                cleaned
            }
        };

        let tag_input = format!("{} {}", entry.title, clean_text);
        let tag_input = sanitize::truncate_bytes(&tag_input, TAGGER_BYTE_LIMIT);
        let entities = self
            .tagger
            .detect_entities(tag_input, "en")
            .await
            .map_err(|e| IngestError::Enrichment(format!("tagging {}: {e}", entry.link)))?;

        Ok(EnrichedItem {
            clean_text,
            raw_html,
            description,
            tags: collect_tags(entities),
            category_terms: terms_or_sentinel(&entry.tag_terms),
        })
    }
}

/// Keep only the entity kinds worth surfacing as tags, case-sensitively
/// de-duplicated in first-seen order; sentinel when nothing remains.
fn collect_tags(entities: Vec<Entity>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    for entity in entities {
        let kept = matches!(
            entity.kind,
            EntityKind::Organization
                | EntityKind::Title
                | EntityKind::CommercialItem
                | EntityKind::Person
        );
        if kept && !tags.contains(&entity.text) {
            tags.push(entity.text);
        }
    }

    if tags.is_empty() {
        tags.push(NO_TAGS.to_string());
    }
    tags
}

fn terms_or_sentinel(terms: &[String]) -> Vec<String> {
    let filtered: Vec<String> = terms
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if filtered.is_empty() {
        vec![NO_TAGS.to_string()]
    } else {
        filtered
    }
}

/// Pull the readable main content out of an article page: a sanitized HTML
/// fragment of the content blocks plus their plain text. Synchronous on
/// purpose — `scraper`'s DOM is not `Send`, so it must never live across an
/// await point.
fn extract_readable(html: &str) -> (String, String) {
    let document = Html::parse_document(html);
    let blocks = Selector::parse("h1, h2, h3, p, li").expect("valid block selector");

    for container in ["article", "main", "body"] {
        let selector = Selector::parse(container).expect("valid container selector");
        if let Some(root) = document.select(&selector).next() {
            let mut fragment = Vec::new();
            let mut text = Vec::new();

            for block in root.select(&blocks) {
                let block_text = block.text().collect::<Vec<_>>().join(" ");
                let block_text = block_text.split_whitespace().collect::<Vec<_>>().join(" ");
                if block_text.is_empty() {
                    continue;
                }
                fragment.push(block.html());
                text.push(block_text);
            }

            if !text.is_empty() {
                return (fragment.join("\n"), text.join("\n"));
            }

            // Container exists but has no block elements; fall back to its
            // bare text.
            let bare = root.text().collect::<Vec<_>>().join(" ");
            let bare = bare.split_whitespace().collect::<Vec<_>>().join(" ");
            if !bare.is_empty() {
                return (root.html(), bare);
            }
        }
    }

    (String::new(), String::new())
}
