//! SQLite connection pool, WAL mode, one database per user under the
//! configured data root (§6 "Persisted state layout").

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

    Ok(pool)
}

/// The metadata database path for a user, rooted under `data_root`.
pub fn metadata_db_path(data_root: &Path, user_id: &str) -> std::path::PathBuf {
    data_root.join(user_id).join("metadata.db")
}

/// The vector index snapshot path for a user, rooted under `data_root`.
pub fn vector_snapshot_path(data_root: &Path, user_id: &str) -> std::path::PathBuf {
    data_root.join(user_id).join("index").join("snapshot")
}

/// The file storage root for a user's uploaded bytes, rooted under
/// `data_root`: `files/<space_id>/<item_id>.<ext>` nests under this.
pub fn files_root(data_root: &Path, user_id: &str) -> std::path::PathBuf {
    data_root.join(user_id).join("files")
}
