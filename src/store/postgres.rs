use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{ItemStore, QueryPage, QueryScope};
use crate::types::{IngestError, Result, StoredItem};

const PAGE_SIZE: i64 = 500;

/// Postgres-backed [`ItemStore`]. The identity is the primary key, so
/// repeated writes of one identity are naturally overwrite-idempotent;
/// pagination is keyset on `(timestamp, identity)`.
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| IngestError::StoreRead(format!("connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IngestError::StoreWrite(format!("migrate: {e}")))?;
        info!("database migrations applied");
        Ok(())
    }
}

fn decode_cursor(cursor: &str) -> Result<(i64, String)> {
    let (ts, identity) = cursor
        .split_once(':')
        .ok_or_else(|| IngestError::StoreRead("malformed cursor".to_string()))?;
    let ts = ts
        .parse()
        .map_err(|_| IngestError::StoreRead("malformed cursor".to_string()))?;
    Ok((ts, identity.to_string()))
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<StoredItem> {
    let read = |e: sqlx::Error| IngestError::StoreRead(format!("row decode: {e}"));

    let tags: serde_json::Value = row.try_get("tags").map_err(read)?;
    let tags_lower: serde_json::Value = row.try_get("tags_lower").map_err(read)?;
    let category_terms: serde_json::Value = row.try_get("category_terms").map_err(read)?;

    Ok(StoredItem {
        identity: row.try_get("identity").map_err(read)?,
        category: row.try_get("category").map_err(read)?,
        timestamp: row.try_get("timestamp").map_err(read)?,
        datestr: row.try_get("datestr").map_err(read)?,
        title: row.try_get("title").map_err(read)?,
        description: row.try_get("description").map_err(read)?,
        clean_text: row.try_get("clean_text").map_err(read)?,
        raw_html: row.try_get("raw_html").map_err(read)?,
        link: row.try_get("link").map_err(read)?,
        author: row.try_get("author").map_err(read)?,
        tags: serde_json::from_value(tags)?,
        tags_lower: serde_json::from_value(tags_lower)?,
        category_terms: serde_json::from_value(category_terms)?,
        visible: row.try_get("visible").map_err(read)?,
    })
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn put(&self, item: &StoredItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (identity, category, timestamp, datestr, title, description,
                               clean_text, raw_html, link, author, tags, tags_lower,
                               category_terms, visible)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (identity) DO NOTHING
            "#,
        )
        .bind(&item.identity)
        .bind(&item.category)
        .bind(item.timestamp)
        .bind(&item.datestr)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.clean_text)
        .bind(&item.raw_html)
        .bind(&item.link)
        .bind(&item.author)
        .bind(serde_json::to_value(&item.tags)?)
        .bind(serde_json::to_value(&item.tags_lower)?)
        .bind(serde_json::to_value(&item.category_terms)?)
        .bind(item.visible)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::StoreWrite(format!("{}: {e}", item.identity)))?;

        Ok(())
    }

    async fn query(
        &self,
        scope: QueryScope,
        since: i64,
        cursor: Option<String>,
    ) -> Result<QueryPage> {
        let after = cursor.as_deref().map(decode_cursor).transpose()?;

        let base = match &scope {
            QueryScope::Category(_) => {
                "SELECT * FROM items WHERE category = $1 AND timestamp > $2"
            }
            QueryScope::AllVisible => "SELECT * FROM items WHERE visible AND timestamp > $1",
        };

        let sql = match (&scope, &after) {
            (QueryScope::Category(_), None) => {
                format!("{base} ORDER BY timestamp, identity LIMIT $3")
            }
            (QueryScope::Category(_), Some(_)) => format!(
                "{base} AND (timestamp, identity) > ($3, $4) ORDER BY timestamp, identity LIMIT $5"
            ),
            (QueryScope::AllVisible, None) => {
                format!("{base} ORDER BY timestamp, identity LIMIT $2")
            }
            (QueryScope::AllVisible, Some(_)) => format!(
                "{base} AND (timestamp, identity) > ($2, $3) ORDER BY timestamp, identity LIMIT $4"
            ),
        };

        let mut query = sqlx::query(&sql);
        if let QueryScope::Category(category) = &scope {
            query = query.bind(category.clone());
        }
        query = query.bind(since);
        if let Some((ts, identity)) = &after {
            query = query.bind(*ts).bind(identity.clone());
        }
        query = query.bind(PAGE_SIZE);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::StoreRead(e.to_string()))?;

        let items = rows
            .iter()
            .map(row_to_item)
            .collect::<Result<Vec<StoredItem>>>()?;

        let next_cursor = if items.len() as i64 == PAGE_SIZE {
            items
                .last()
                .map(|i| format!("{}:{}", i.timestamp, i.identity))
        } else {
            None
        };

        Ok(QueryPage { items, next_cursor })
    }
}
