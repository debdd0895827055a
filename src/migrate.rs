//! Database schema migrations: idempotent `CREATE TABLE IF NOT EXISTS`
//! statements for the Space/Item/Query metadata store (§4.5).

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spaces (
            space_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            item_id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            extracted_text TEXT,
            metadata_json TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL,
            failure_reason TEXT,
            vector_ref INTEGER,
            FOREIGN KEY (space_id) REFERENCES spaces(space_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only query history. No foreign key from query_sources.item_id to
    // items(item_id): historical sources are an immutable snapshot and must
    // survive item deletion (§3 invariant 4, §9 design note).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queries (
            query_id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (space_id) REFERENCES spaces(space_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_sources (
            query_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            item_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            snippet TEXT NOT NULL,
            score REAL NOT NULL,
            PRIMARY KEY (query_id, position),
            FOREIGN KEY (query_id) REFERENCES queries(query_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_space_id ON items(space_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_status ON items(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_space_id_created_at ON queries(space_id, created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
