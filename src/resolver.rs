use std::collections::HashMap;

use chrono::{DateTime, Utc};
use url::Url;

use crate::types::{RawEntry, Resolved};

/// Assigns each raw entry a stable identity and a normalized timestamp.
///
/// One resolver instance serves one feed batch; the collision counter
/// resets between batches. Identity never depends on the title (titles are
/// mutable and get retranslated), so the same logical post resolves to the
/// same identity on every fetch.
pub struct IdentityResolver {
    /// Count of entries already assigned per raw timestamp in this batch.
    assigned: HashMap<i64, i64>,
    /// Reference time used when an entry carries no publish time, fixed at
    /// construction so one batch resolves consistently.
    fallback: DateTime<Utc>,
}

impl IdentityResolver {
    pub fn new(fallback: DateTime<Utc>) -> Self {
        Self {
            assigned: HashMap::new(),
            fallback,
        }
    }

    pub fn resolve(&mut self, entry: &RawEntry) -> Resolved {
        let identity = if entry.guid.is_empty() {
            normalize_link(&entry.link)
        } else {
            entry.guid.clone()
        };

        let raw = entry.published.unwrap_or(self.fallback).timestamp();

        // Repeated raw timestamps within a batch are perturbed by the number
        // of prior entries at that value, keeping input order and giving
        // every item in the category a distinct effective timestamp. This is
        // a heuristic; relative order across batches is not guaranteed.
        let prior = self.assigned.entry(raw).or_insert(0);
        let timestamp = raw + *prior;
        *prior += 1;

        Resolved { identity, timestamp }
    }
}

/// Canonical form of a link for identity purposes: URL-parsed with the
/// fragment dropped, or the trimmed raw string when unparseable. Both
/// branches are deterministic, so repeated runs converge.
fn normalize_link(link: &str) -> String {
    match Url::parse(link.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => link.trim().to_string(),
    }
}
