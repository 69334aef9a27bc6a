pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::types::{Result, StoredItem};

pub use memory::MemoryStore;
pub use postgres::PgItemStore;

/// Which slice of the table a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// Items of one category, by its timestamp-sorted index.
    Category(String),
    /// Every visible item regardless of category (the `visible` index).
    AllVisible,
}

/// One page of query results. Callers follow `next_cursor` until it is
/// absent and must tolerate the same item appearing on more than one page.
#[derive(Debug, Default)]
pub struct QueryPage {
    pub items: Vec<StoredItem>,
    pub next_cursor: Option<String>,
}

/// Durable key-value store for item records. `put` is overwrite-idempotent:
/// the identity is the primary key, so writing the same identity twice
/// yields one logical record.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn put(&self, item: &StoredItem) -> Result<()>;

    /// Items in `scope` with timestamp strictly greater than `since`,
    /// ascending, paginated via an opaque cursor.
    async fn query(
        &self,
        scope: QueryScope,
        since: i64,
        cursor: Option<String>,
    ) -> Result<QueryPage>;
}
