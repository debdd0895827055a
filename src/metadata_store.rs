//! The durable ordered metadata store (§4.5): Space/Item/Query CRUD.
//!
//! Backed by a sqlx SQLite pool in WAL mode (see `db.rs`/`migrate.rs` for
//! connection setup and schema), exposed behind a `MetadataStore` trait so
//! the pipeline depends on the contract rather than the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::models::{Item, ItemKind, ItemMetadata, ItemStatus, Query, Source, Space};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_space(&self, user_id: &str, name: &str, description: Option<String>) -> CoreResult<Space>;
    async fn list_spaces(&self, user_id: &str) -> CoreResult<Vec<Space>>;
    async fn get_space(&self, space_id: &str) -> CoreResult<Space>;
    async fn update_space(
        &self,
        space_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> CoreResult<Space>;
    /// Deletes the space row and every item row scoped to it. The caller
    /// (`AppContext`) is responsible for the VectorIndex and file-byte
    /// cascades that live outside this store (§3 "deletion cascades").
    async fn delete_space(&self, space_id: &str) -> CoreResult<()>;

    /// `item_id` is generated by the caller (not the store) so that a file's
    /// `content` storage path, which embeds the item_id, can be computed
    /// before the row exists.
    async fn insert_item_pending(
        &self,
        item_id: &str,
        space_id: &str,
        kind: ItemKind,
        content: String,
        metadata: ItemMetadata,
        notes: Option<String>,
    ) -> CoreResult<Item>;
    async fn mark_item_ready(&self, item_id: &str, extracted_text: &str, vector_ref: u64) -> CoreResult<()>;
    async fn mark_item_failed(&self, item_id: &str, reason: &str) -> CoreResult<()>;
    async fn get_item(&self, item_id: &str) -> CoreResult<Item>;
    async fn list_items(&self, space_id: &str, limit: i64, offset: i64) -> CoreResult<Vec<Item>>;
    /// All items owned by `user_id`, across every space, for global search
    /// hydration (§4.5).
    async fn list_all_items_of_user(&self, user_id: &str) -> CoreResult<Vec<Item>>;
    /// Removes the item row outright. Returns `Ok(())` even if the item was
    /// already gone (delete is idempotent at the engine level, §7 kind 2).
    async fn delete_item(&self, space_id: &str, item_id: &str) -> CoreResult<()>;

    async fn insert_query(&self, query: &Query) -> CoreResult<()>;
    async fn list_queries(&self, space_id: &str, limit: i64, offset: i64) -> CoreResult<Vec<Query>>;
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn item_kind_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Message => "message",
        ItemKind::File => "file",
    }
}

fn parse_item_kind(s: &str) -> CoreResult<ItemKind> {
    match s {
        "message" => Ok(ItemKind::Message),
        "file" => Ok(ItemKind::File),
        other => Err(CoreError::Internal(format!("unknown item kind in storage: {other}"))),
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Item> {
    let metadata_json: String = row.try_get("metadata_json").map_err(CoreError::from_sqlx)?;
    let metadata: ItemMetadata =
        serde_json::from_str(&metadata_json).map_err(|e| CoreError::Internal(format!("corrupt metadata: {e}")))?;

    let status_str: String = row.try_get("status").map_err(CoreError::from_sqlx)?;
    let failure_reason: Option<String> = row.try_get("failure_reason").map_err(CoreError::from_sqlx)?;
    let status = match status_str.as_str() {
        "pending" => ItemStatus::Pending,
        "ready" => ItemStatus::Ready,
        "failed" => ItemStatus::Failed { reason: failure_reason.unwrap_or_default() },
        other => return Err(CoreError::Internal(format!("unknown item status in storage: {other}"))),
    };

    let vector_ref: Option<i64> = row.try_get("vector_ref").map_err(CoreError::from_sqlx)?;
    let kind_str: String = row.try_get("kind").map_err(CoreError::from_sqlx)?;

    Ok(Item {
        item_id: row.try_get("item_id").map_err(CoreError::from_sqlx)?,
        space_id: row.try_get("space_id").map_err(CoreError::from_sqlx)?,
        kind: parse_item_kind(&kind_str)?,
        content: row.try_get("content").map_err(CoreError::from_sqlx)?,
        extracted_text: row.try_get("extracted_text").map_err(CoreError::from_sqlx)?,
        metadata,
        notes: row.try_get("notes").map_err(CoreError::from_sqlx)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(CoreError::from_sqlx)?,
        status,
        vector_ref: vector_ref.map(|v| v as u64),
    })
}

impl CoreError {
    fn from_sqlx(e: sqlx::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_space(&self, user_id: &str, name: &str, description: Option<String>) -> CoreResult<Space> {
        if name.is_empty() || name.chars().count() > 50 {
            return Err(CoreError::InvalidInput("space name must be 1-50 characters".to_string()));
        }
        if let Some(d) = &description {
            if d.chars().count() > 500 {
                return Err(CoreError::InvalidInput("space description must be <= 500 characters".to_string()));
            }
        }

        let space_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO spaces (space_id, user_id, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&space_id)
        .bind(user_id)
        .bind(name)
        .bind(&description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        Ok(Space {
            space_id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
            item_count: 0,
        })
    }

    async fn list_spaces(&self, user_id: &str) -> CoreResult<Vec<Space>> {
        let rows = sqlx::query(
            "SELECT s.space_id, s.user_id, s.name, s.description, s.created_at, s.updated_at, \
                    (SELECT COUNT(*) FROM items i WHERE i.space_id = s.space_id) AS item_count \
             FROM spaces s WHERE s.user_id = ? ORDER BY s.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        rows.iter()
            .map(|row| {
                Ok(Space {
                    space_id: row.try_get("space_id").map_err(CoreError::from_sqlx)?,
                    user_id: row.try_get("user_id").map_err(CoreError::from_sqlx)?,
                    name: row.try_get("name").map_err(CoreError::from_sqlx)?,
                    description: row.try_get("description").map_err(CoreError::from_sqlx)?,
                    created_at: row.try_get("created_at").map_err(CoreError::from_sqlx)?,
                    updated_at: row.try_get("updated_at").map_err(CoreError::from_sqlx)?,
                    item_count: row.try_get("item_count").map_err(CoreError::from_sqlx)?,
                })
            })
            .collect()
    }

    async fn get_space(&self, space_id: &str) -> CoreResult<Space> {
        let row = sqlx::query(
            "SELECT s.space_id, s.user_id, s.name, s.description, s.created_at, s.updated_at, \
                    (SELECT COUNT(*) FROM items i WHERE i.space_id = s.space_id) AS item_count \
             FROM spaces s WHERE s.space_id = ?",
        )
        .bind(space_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?
        .ok_or_else(|| CoreError::NotFound(format!("space {space_id}")))?;

        Ok(Space {
            space_id: row.try_get("space_id").map_err(CoreError::from_sqlx)?,
            user_id: row.try_get("user_id").map_err(CoreError::from_sqlx)?,
            name: row.try_get("name").map_err(CoreError::from_sqlx)?,
            description: row.try_get("description").map_err(CoreError::from_sqlx)?,
            created_at: row.try_get("created_at").map_err(CoreError::from_sqlx)?,
            updated_at: row.try_get("updated_at").map_err(CoreError::from_sqlx)?,
            item_count: row.try_get("item_count").map_err(CoreError::from_sqlx)?,
        })
    }

    async fn update_space(
        &self,
        space_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> CoreResult<Space> {
        let mut current = self.get_space(space_id).await?;
        if let Some(n) = name {
            if n.is_empty() || n.chars().count() > 50 {
                return Err(CoreError::InvalidInput("space name must be 1-50 characters".to_string()));
            }
            current.name = n;
        }
        if let Some(d) = description {
            if d.chars().count() > 500 {
                return Err(CoreError::InvalidInput("space description must be <= 500 characters".to_string()));
            }
            current.description = Some(d);
        }
        let now = Utc::now();

        sqlx::query("UPDATE spaces SET name = ?, description = ?, updated_at = ? WHERE space_id = ?")
            .bind(&current.name)
            .bind(&current.description)
            .bind(now)
            .bind(space_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from_sqlx)?;

        current.updated_at = now;
        Ok(current)
    }

    async fn delete_space(&self, space_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from_sqlx)?;
        sqlx::query("DELETE FROM items WHERE space_id = ?")
            .bind(space_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from_sqlx)?;
        sqlx::query("DELETE FROM spaces WHERE space_id = ?")
            .bind(space_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from_sqlx)?;
        tx.commit().await.map_err(CoreError::from_sqlx)?;
        Ok(())
    }

    async fn insert_item_pending(
        &self,
        item_id: &str,
        space_id: &str,
        kind: ItemKind,
        content: String,
        metadata: ItemMetadata,
        notes: Option<String>,
    ) -> CoreResult<Item> {
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| CoreError::Internal(format!("failed to serialize metadata: {e}")))?;

        sqlx::query(
            "INSERT INTO items (item_id, space_id, kind, content, extracted_text, metadata_json, notes, \
             created_at, status, failure_reason, vector_ref) \
             VALUES (?, ?, ?, ?, NULL, ?, ?, ?, 'pending', NULL, NULL)",
        )
        .bind(item_id)
        .bind(space_id)
        .bind(item_kind_str(kind))
        .bind(&content)
        .bind(&metadata_json)
        .bind(&notes)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        Ok(Item {
            item_id: item_id.to_string(),
            space_id: space_id.to_string(),
            kind,
            content,
            extracted_text: None,
            metadata,
            notes,
            created_at: now,
            status: ItemStatus::Pending,
            vector_ref: None,
        })
    }

    async fn mark_item_ready(&self, item_id: &str, extracted_text: &str, vector_ref: u64) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE items SET status = 'ready', extracted_text = ?, vector_ref = ?, failure_reason = NULL \
             WHERE item_id = ?",
        )
        .bind(extracted_text)
        .bind(vector_ref as i64)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn mark_item_failed(&self, item_id: &str, reason: &str) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE items SET status = 'failed', failure_reason = ?, vector_ref = NULL WHERE item_id = ?",
        )
        .bind(reason)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> CoreResult<Item> {
        let row = sqlx::query(
            "SELECT item_id, space_id, kind, content, extracted_text, metadata_json, notes, \
                    created_at, status, failure_reason, vector_ref FROM items WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?
        .ok_or_else(|| CoreError::NotFound(format!("item {item_id}")))?;

        row_to_item(&row)
    }

    async fn list_items(&self, space_id: &str, limit: i64, offset: i64) -> CoreResult<Vec<Item>> {
        let rows = sqlx::query(
            "SELECT item_id, space_id, kind, content, extracted_text, metadata_json, notes, \
                    created_at, status, failure_reason, vector_ref FROM items \
             WHERE space_id = ? ORDER BY created_at ASC LIMIT ? OFFSET ?",
        )
        .bind(space_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        rows.iter().map(row_to_item).collect()
    }

    async fn list_all_items_of_user(&self, user_id: &str) -> CoreResult<Vec<Item>> {
        let rows = sqlx::query(
            "SELECT i.item_id, i.space_id, i.kind, i.content, i.extracted_text, i.metadata_json, i.notes, \
                    i.created_at, i.status, i.failure_reason, i.vector_ref \
             FROM items i JOIN spaces s ON i.space_id = s.space_id \
             WHERE s.user_id = ? ORDER BY i.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        rows.iter().map(row_to_item).collect()
    }

    async fn delete_item(&self, space_id: &str, item_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM items WHERE item_id = ? AND space_id = ?")
            .bind(item_id)
            .bind(space_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from_sqlx)?;
        Ok(())
    }

    async fn insert_query(&self, query: &Query) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO queries (query_id, space_id, question, answer, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&query.query_id)
        .bind(&query.space_id)
        .bind(&query.question)
        .bind(&query.answer)
        .bind(query.created_at)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::from_sqlx)?;

        for (position, source) in query.sources.iter().enumerate() {
            sqlx::query(
                "INSERT INTO query_sources (query_id, position, item_id, kind, snippet, score) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&query.query_id)
            .bind(position as i64)
            .bind(&source.item_id)
            .bind(item_kind_str(source.kind))
            .bind(&source.snippet)
            .bind(source.score)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from_sqlx)?;
        }

        tx.commit().await.map_err(CoreError::from_sqlx)?;
        Ok(())
    }

    async fn list_queries(&self, space_id: &str, limit: i64, offset: i64) -> CoreResult<Vec<Query>> {
        let query_rows = sqlx::query(
            "SELECT query_id, space_id, question, answer, created_at FROM queries \
             WHERE space_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(space_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from_sqlx)?;

        let mut queries = Vec::with_capacity(query_rows.len());
        for row in query_rows {
            let query_id: String = row.try_get("query_id").map_err(CoreError::from_sqlx)?;

            let source_rows = sqlx::query(
                "SELECT item_id, kind, snippet, score FROM query_sources \
                 WHERE query_id = ? ORDER BY position ASC",
            )
            .bind(&query_id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from_sqlx)?;

            let mut sources = Vec::with_capacity(source_rows.len());
            for source_row in source_rows {
                let kind_str: String = source_row.try_get("kind").map_err(CoreError::from_sqlx)?;
                sources.push(Source {
                    item_id: source_row.try_get("item_id").map_err(CoreError::from_sqlx)?,
                    kind: parse_item_kind(&kind_str)?,
                    snippet: source_row.try_get("snippet").map_err(CoreError::from_sqlx)?,
                    score: source_row.try_get("score").map_err(CoreError::from_sqlx)?,
                });
            }

            queries.push(Query {
                query_id,
                space_id: row.try_get("space_id").map_err(CoreError::from_sqlx)?,
                question: row.try_get("question").map_err(CoreError::from_sqlx)?,
                answer: row.try_get("answer").map_err(CoreError::from_sqlx)?,
                sources,
                created_at: row.try_get("created_at").map_err(CoreError::from_sqlx)?,
            });
        }

        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn test_store() -> SqliteMetadataStore {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("metadata.db")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        // Leak the tempdir so the sqlite file survives the test.
        std::mem::forget(dir);
        SqliteMetadataStore::new(pool)
    }

    #[tokio::test]
    async fn create_and_get_space_round_trips() {
        let store = test_store().await;
        let space = store.create_space("user-1", "Travel", Some("trip notes".to_string())).await.unwrap();
        let fetched = store.get_space(&space.space_id).await.unwrap();
        assert_eq!(fetched.name, "Travel");
        assert_eq!(fetched.item_count, 0);
    }

    #[tokio::test]
    async fn item_count_reflects_live_items() {
        let store = test_store().await;
        let space = store.create_space("user-1", "Travel", None).await.unwrap();
        store
            .insert_item_pending(
                &Uuid::new_v4().to_string(),
                &space.space_id,
                ItemKind::Message,
                "hello".to_string(),
                ItemMetadata::Message { extra: Default::default() },
                None,
            )
            .await
            .unwrap();

        let fetched = store.get_space(&space.space_id).await.unwrap();
        assert_eq!(fetched.item_count, 1);
    }

    #[tokio::test]
    async fn item_status_transitions() {
        let store = test_store().await;
        let space = store.create_space("user-1", "Travel", None).await.unwrap();
        let item = store
            .insert_item_pending(
                &Uuid::new_v4().to_string(),
                &space.space_id,
                ItemKind::Message,
                "hello".to_string(),
                ItemMetadata::Message { extra: Default::default() },
                None,
            )
            .await
            .unwrap();
        assert_eq!(item.status, ItemStatus::Pending);

        store.mark_item_ready(&item.item_id, "hello", 7).await.unwrap();
        let ready = store.get_item(&item.item_id).await.unwrap();
        assert_eq!(ready.status, ItemStatus::Ready);
        assert_eq!(ready.vector_ref, Some(7));

        store.mark_item_failed(&item.item_id, "too large").await.unwrap();
        let failed = store.get_item(&item.item_id).await.unwrap();
        assert_eq!(failed.status, ItemStatus::Failed { reason: "too large".to_string() });
        assert_eq!(failed.vector_ref, None);
    }

    #[tokio::test]
    async fn delete_item_is_idempotent() {
        let store = test_store().await;
        let space = store.create_space("user-1", "Travel", None).await.unwrap();
        let item = store
            .insert_item_pending(
                &Uuid::new_v4().to_string(),
                &space.space_id,
                ItemKind::Message,
                "hello".to_string(),
                ItemMetadata::Message { extra: Default::default() },
                None,
            )
            .await
            .unwrap();

        store.delete_item(&space.space_id, &item.item_id).await.unwrap();
        store.delete_item(&space.space_id, &item.item_id).await.unwrap();
        assert!(store.get_item(&item.item_id).await.is_err());
    }

    #[tokio::test]
    async fn query_history_survives_source_item_deletion() {
        let store = test_store().await;
        let space = store.create_space("user-1", "Travel", None).await.unwrap();
        let item = store
            .insert_item_pending(
                &Uuid::new_v4().to_string(),
                &space.space_id,
                ItemKind::Message,
                "the airbnb cost 18500".to_string(),
                ItemMetadata::Message { extra: Default::default() },
                None,
            )
            .await
            .unwrap();
        store.mark_item_ready(&item.item_id, "the airbnb cost 18500", 1).await.unwrap();

        let query = Query {
            query_id: Uuid::new_v4().to_string(),
            space_id: space.space_id.clone(),
            question: "how much was the airbnb".to_string(),
            answer: "18500".to_string(),
            sources: vec![Source {
                item_id: item.item_id.clone(),
                kind: ItemKind::Message,
                snippet: "the airbnb cost 18500".to_string(),
                score: 0.9,
            }],
            created_at: Utc::now(),
        };
        store.insert_query(&query).await.unwrap();

        store.delete_item(&space.space_id, &item.item_id).await.unwrap();

        let history = store.list_queries(&space.space_id, 10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sources[0].item_id, item.item_id);
    }
}
