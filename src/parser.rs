use chrono::Utc;
use feed_rs::parser;
use tracing::{debug, info};

use crate::types::{FeedSource, IngestError, RawEntry, Result};

/// Parse one fetched feed document into raw entries, preserving document
/// order. Entries without any link are unusable (no identity fallback, no
/// article to enrich) and are skipped rather than failing the feed.
pub fn parse_feed(source: &FeedSource, content: &str) -> Result<Vec<RawEntry>> {
    let feed = parser::parse(content.as_bytes())
        .map_err(|e| IngestError::Parse(format!("{}: {}", source.category, e)))?;

    let mut entries = Vec::new();

    for entry in feed.entries {
        let link = match entry.links.first() {
            Some(l) => l.href.clone(),
            None => {
                debug!("skipping entry without link in {}", source.category);
                continue;
            }
        };

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string())
            // Double quotes break downstream HTML snippets; the stored
            // convention is single quotes.
            .replace('"', "'");

        let description = entry.summary.map(|s| s.content).unwrap_or_default();
        let author = entry.authors.first().map(|a| a.name.clone());
        let published = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));
        let tag_terms = entry.categories.into_iter().map(|c| c.term).collect();

        // feed-rs synthesizes an id when the document carries none; only a
        // value that literally appears in the source is a real guid. A
        // synthesized or absent guid falls through to the resolver's
        // link-derived identity.
        let guid = if !entry.id.is_empty() && content.contains(&entry.id) {
            entry.id
        } else {
            String::new()
        };

        entries.push(RawEntry {
            category: source.category.clone(),
            source_url: source.url.clone(),
            guid,
            title,
            link,
            published,
            description,
            author,
            tag_terms,
        });
    }

    info!("parsed {} entries from {}", entries.len(), source.category);
    Ok(entries)
}
