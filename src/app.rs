//! `AppContext`: the per-process application object owning every shared
//! service (§9 "Shared mutable service objects" — explicit dependencies
//! instead of the source's module-level singletons) and exposing the four
//! External Interfaces boundaries from §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::errors::{CoreError, CoreResult};
use crate::extract;
use crate::llm::{self, LlmClient};
use crate::metadata_store::{MetadataStore, SqliteMetadataStore};
use crate::migrate;
use crate::models::{Item, ItemKind, ItemMetadata, MimeFamily, Query, ScoredItem, Space};
use crate::ocr::{self, OcrProvider};
use crate::query_engine;
use crate::vector_index::VectorIndex;

/// Per-user working set: one metadata database and one vector index, lazily
/// opened on first access and cached for the process lifetime (§4.3 "a
/// single on-disk ANN structure per user").
struct UserState {
    vector_index: VectorIndex,
    metadata_store: SqliteMetadataStore,
    files_root: PathBuf,
}

pub struct AppContext {
    config: Config,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    llm_client: Arc<dyn LlmClient>,
    ocr_provider: Arc<dyn OcrProvider>,
    users: Mutex<HashMap<String, Arc<UserState>>>,
}

impl AppContext {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::from(embedding::create_provider(&config.embedding)?);
        let llm_client: Arc<dyn LlmClient> = Arc::from(llm::build_client(
            &config.llm.provider,
            &config.llm.model,
            config.llm.api_key.clone(),
            config.llm.api_base.clone(),
        ));
        let ocr_provider: Arc<dyn OcrProvider> = Arc::from(ocr::build_provider(&config.ocr.provider));

        Ok(Self { config, embedding_provider, llm_client, ocr_provider, users: Mutex::new(HashMap::new()) })
    }

    /// Evicts a user's cached working set, forcing the next access to reopen
    /// the database and reload the vector index from disk. Used after
    /// `reindex` replaces the on-disk snapshot out from under the cache.
    async fn evict_user(&self, user_id: &str) {
        self.users.lock().await.remove(user_id);
    }

    async fn user_state(&self, user_id: &str) -> CoreResult<Arc<UserState>> {
        if let Some(state) = self.users.lock().await.get(user_id) {
            return Ok(state.clone());
        }

        let dims = self
            .config
            .embedding
            .dims
            .ok_or_else(|| CoreError::Internal("embedding.dims must be configured".to_string()))?;

        let db_path = db::metadata_db_path(&self.config.data_root, user_id);
        let pool = db::connect(&db_path).await.map_err(|e| CoreError::Internal(e.to_string()))?;
        migrate::run_migrations(&pool).await.map_err(|e| CoreError::Internal(e.to_string()))?;

        let snapshot_path = db::vector_snapshot_path(&self.config.data_root, user_id);
        let vector_index = VectorIndex::load(dims, snapshot_path).await?;
        let files_root = db::files_root(&self.config.data_root, user_id);

        let state = Arc::new(UserState {
            vector_index,
            metadata_store: SqliteMetadataStore::new(pool),
            files_root,
        });

        // A second caller racing this one may build its own state; whichever
        // wins the lock below is cached, the loser's copy is simply dropped.
        let mut guard = self.users.lock().await;
        Ok(guard.entry(user_id.to_string()).or_insert(state).clone())
    }

    // ---- Space operations (§6) ----

    pub async fn create_space(&self, user_id: &str, name: &str, description: Option<String>) -> CoreResult<Space> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.create_space(user_id, name, description).await
    }

    pub async fn list_spaces(&self, user_id: &str) -> CoreResult<Vec<Space>> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.list_spaces(user_id).await
    }

    pub async fn get_space(&self, user_id: &str, space_id: &str) -> CoreResult<Space> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.get_space(space_id).await
    }

    pub async fn update_space(
        &self,
        user_id: &str,
        space_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> CoreResult<Space> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.update_space(space_id, name, description).await
    }

    /// Deletion cascades to items, their vector entries, and their file
    /// bytes; query history is left untouched (§3 invariant 4).
    pub async fn delete_space(&self, user_id: &str, space_id: &str) -> CoreResult<()> {
        let state = self.user_state(user_id).await?;
        let items = state.metadata_store.list_items(space_id, i64::MAX, 0).await?;
        for item in &items {
            state.vector_index.delete(&item.item_id).await;
            if item.kind == ItemKind::File {
                remove_file_bytes(&state.files_root, &item.content).await;
            }
        }
        state.vector_index.persist().await?;
        state.metadata_store.delete_space(space_id).await?;
        Ok(())
    }

    // ---- Item operations (§6) ----

    pub async fn save_message(
        &self,
        user_id: &str,
        space_id: &str,
        text: &str,
        notes: Option<String>,
    ) -> CoreResult<Item> {
        if text.is_empty() || text.chars().count() > 100_000 {
            return Err(CoreError::InvalidInput(
                "message text must be 1-100000 characters".to_string(),
            ));
        }

        let state = self.user_state(user_id).await?;
        state.metadata_store.get_space(space_id).await?;

        let item_id = uuid::Uuid::new_v4().to_string();
        let item = state
            .metadata_store
            .insert_item_pending(
                &item_id,
                space_id,
                ItemKind::Message,
                text.to_string(),
                ItemMetadata::Message { extra: Default::default() },
                notes,
            )
            .await?;

        match self.embed_and_index(&state, &item.item_id, space_id, text).await {
            Ok(vector_ref) => {
                state.metadata_store.mark_item_ready(&item.item_id, text, vector_ref).await?;
                state.vector_index.persist().await?;
                Ok(Item {
                    extracted_text: Some(text.to_string()),
                    status: crate::models::ItemStatus::Ready,
                    vector_ref: Some(vector_ref),
                    ..item
                })
            }
            Err(e) => Err(self.compensate_failed_ingestion(&state, &item, e).await),
        }
    }

    pub async fn save_file(
        &self,
        user_id: &str,
        space_id: &str,
        bytes: &[u8],
        declared_mime: MimeFamily,
        original_name: &str,
        notes: Option<String>,
    ) -> CoreResult<Item> {
        if bytes.len() as u64 > extract::MAX_INPUT_BYTES {
            return Err(CoreError::TooLarge);
        }

        let state = self.user_state(user_id).await?;
        state.metadata_store.get_space(space_id).await?;

        let item_id = uuid::Uuid::new_v4().to_string();
        let ext = file_extension(original_name);
        let content = format!("{space_id}/{item_id}.{ext}");

        let metadata = ItemMetadata::File {
            original_name: original_name.to_string(),
            size_bytes: bytes.len() as u64,
            mime_family: declared_mime,
            ocr_applied: declared_mime == MimeFamily::Image,
            extra: Default::default(),
        };

        let item = state
            .metadata_store
            .insert_item_pending(&item_id, space_id, ItemKind::File, content, metadata, notes)
            .await?;

        match self.ingest_file(&state, &item, bytes, declared_mime).await {
            Ok((text, vector_ref)) => {
                state.metadata_store.mark_item_ready(&item.item_id, &text, vector_ref).await?;
                state.vector_index.persist().await?;
                Ok(Item {
                    extracted_text: Some(text),
                    status: crate::models::ItemStatus::Ready,
                    vector_ref: Some(vector_ref),
                    ..item
                })
            }
            Err(e) => Err(self.compensate_failed_ingestion(&state, &item, e).await),
        }
    }

    pub async fn list_items(
        &self,
        user_id: &str,
        space_id: &str,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Item>> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.list_items(space_id, limit, offset).await
    }

    /// Self-compensating: index entry removed first, then metadata row
    /// (§7 "Delete operations are self-compensating"). Idempotent: deleting
    /// an already-gone item succeeds.
    pub async fn delete_item(&self, user_id: &str, space_id: &str, item_id: &str) -> CoreResult<()> {
        let state = self.user_state(user_id).await?;
        let item = match state.metadata_store.get_item(item_id).await {
            Ok(item) => item,
            Err(CoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        state.vector_index.delete(item_id).await;
        if item.kind == ItemKind::File {
            remove_file_bytes(&state.files_root, &item.content).await;
        }
        state.metadata_store.delete_item(space_id, item_id).await?;
        state.vector_index.persist().await?;
        Ok(())
    }

    // ---- Query operations (§6) ----

    pub async fn query(
        &self,
        user_id: &str,
        space_id: &str,
        question: &str,
        k: Option<usize>,
    ) -> CoreResult<Query> {
        if question.is_empty() || question.chars().count() > 2_000 {
            return Err(CoreError::InvalidInput("question must be 1-2000 characters".to_string()));
        }

        let state = self.user_state(user_id).await?;
        let mut retrieval_config = self.config.retrieval.clone();
        if let Some(k) = k {
            if !(1..=20).contains(&k) {
                return Err(CoreError::InvalidInput("K must be in 1..=20".to_string()));
            }
            retrieval_config.k_retrieve = k;
        }

        query_engine::answer_question(
            &state.vector_index,
            &state.metadata_store,
            self.embedding_provider.as_ref(),
            &self.config.embedding,
            self.llm_client.as_ref(),
            &retrieval_config,
            space_id,
            question,
        )
        .await
    }

    pub async fn list_queries(
        &self,
        user_id: &str,
        space_id: &str,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Query>> {
        let state = self.user_state(user_id).await?;
        state.metadata_store.list_queries(space_id, limit, offset).await
    }

    pub async fn search_in_space(
        &self,
        user_id: &str,
        space_id: &str,
        text: &str,
        k: usize,
    ) -> CoreResult<Vec<ScoredItem>> {
        let state = self.user_state(user_id).await?;
        let vector = embedding::embed(self.embedding_provider.as_ref(), &self.config.embedding, text).await?;
        let hits = state.vector_index.search(&vector, space_id, k).await?;
        self.hydrate_hits(&state, hits).await
    }

    pub async fn global_search(&self, user_id: &str, text: &str, k: usize) -> CoreResult<Vec<ScoredItem>> {
        let state = self.user_state(user_id).await?;
        let vector = embedding::embed(self.embedding_provider.as_ref(), &self.config.embedding, text).await?;
        let hits = state.vector_index.global_search(&vector, k).await?;
        self.hydrate_hits(&state, hits).await
    }

    async fn hydrate_hits(&self, state: &UserState, hits: Vec<crate::vector_index::Hit>) -> CoreResult<Vec<ScoredItem>> {
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            match state.metadata_store.get_item(&hit.item_id).await {
                Ok(item) => out.push(ScoredItem { item, score: hit.score }),
                Err(CoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    // ---- Administrative operation (§9: "implementers should expose an
    // administrative reindex operation" after an embedding-model change) ----

    /// Rebuilds the user's vector index from scratch by re-embedding every
    /// ready item's extracted text under the current embedding config, then
    /// evicts the cached working set so the next access reloads the fresh
    /// on-disk snapshot.
    pub async fn reindex(&self, user_id: &str) -> CoreResult<usize> {
        let dims = self
            .config
            .embedding
            .dims
            .ok_or_else(|| CoreError::Internal("embedding.dims must be configured".to_string()))?;

        let state = self.user_state(user_id).await?;
        let items = state.metadata_store.list_all_items_of_user(user_id).await?;
        let snapshot_path = db::vector_snapshot_path(&self.config.data_root, user_id);
        let fresh_index = VectorIndex::new(dims, snapshot_path);

        let mut reindexed = 0usize;
        for item in items.iter().filter(|i| i.status.is_ready()) {
            let text = item.extracted_text.as_deref().unwrap_or(&item.content);
            let vector = embedding::embed(self.embedding_provider.as_ref(), &self.config.embedding, text).await?;
            let vector_ref = fresh_index.add(&item.item_id, vector, &item.space_id).await?;
            state.metadata_store.mark_item_ready(&item.item_id, text, vector_ref).await?;
            reindexed += 1;
        }

        fresh_index.persist().await?;
        self.evict_user(user_id).await;
        info!(user_id, reindexed, "reindex complete");
        Ok(reindexed)
    }

    // ---- Ingestion helpers (§5 ordering: insert-pending -> extract ->
    // embed -> VectorIndex.add -> mark-ready) ----

    async fn embed_and_index(
        &self,
        state: &UserState,
        item_id: &str,
        space_id: &str,
        text: &str,
    ) -> CoreResult<u64> {
        let vector = embedding::embed(self.embedding_provider.as_ref(), &self.config.embedding, text).await?;
        state.vector_index.add(item_id, vector, space_id).await
    }

    async fn ingest_file(
        &self,
        state: &UserState,
        item: &Item,
        bytes: &[u8],
        mime_family: MimeFamily,
    ) -> CoreResult<(String, u64)> {
        let text = extract::extract_text(bytes, mime_family, self.ocr_provider.as_ref()).await?;
        let vector_ref = self.embed_and_index(state, &item.item_id, &item.space_id, &text).await?;

        if let Err(e) = write_file_bytes(&state.files_root, &item.content, bytes).await {
            state.vector_index.delete(&item.item_id).await;
            return Err(e);
        }

        Ok((text, vector_ref))
    }

    /// On failure between insert-pending and mark-ready: for failures
    /// intrinsic to the input (§7 kinds 3), mark the item `failed` with the
    /// reason and keep it; for transient failures (kinds 4-6), remove the
    /// item entirely so the caller may retry (§7 "Propagation and
    /// compensation"). Returns the original error either way.
    async fn compensate_failed_ingestion(&self, state: &UserState, item: &Item, error: CoreError) -> CoreError {
        if error.is_intrinsic_to_input() {
            if let Err(mark_err) = state.metadata_store.mark_item_failed(&item.item_id, &error.to_string()).await {
                warn!(item_id = %item.item_id, error = %mark_err, "failed to record item failure");
            }
        } else {
            if let Err(delete_err) = state.metadata_store.delete_item(&item.space_id, &item.item_id).await {
                warn!(item_id = %item.item_id, error = %delete_err, "failed to remove item after transient ingestion failure");
            }
            if item.kind == ItemKind::File {
                remove_file_bytes(&state.files_root, &item.content).await;
            }
        }
        error
    }
}

fn file_extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string()
}

async fn write_file_bytes(files_root: &Path, relative_path: &str, bytes: &[u8]) -> CoreResult<()> {
    let full_path = files_root.join(relative_path);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to create file storage directory: {e}")))?;
    }
    tokio::fs::write(&full_path, bytes)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to write file bytes: {e}")))
}

async fn remove_file_bytes(files_root: &Path, relative_path: &str) {
    let full_path = files_root.join(relative_path);
    if let Err(e) = tokio::fs::remove_file(&full_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %full_path.display(), error = %e, "failed to remove file bytes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(data_root: &Path) -> Config {
        let toml_text = format!(
            "data_root = \"{}\"\n[embedding]\nprovider = \"disabled\"\n",
            data_root.display()
        );
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, toml_text.as_bytes()).unwrap();
        let mut config = crate::config::load_config(f.path()).unwrap();
        // Disabled-provider configs skip the dims requirement at load time,
        // but the VectorIndex still needs a fixed dimension to operate on.
        config.embedding.dims = Some(3);
        config
    }

    #[tokio::test]
    async fn save_message_without_embedder_removes_item_entirely() {
        // BackendUnavailable is a transient failure kind (§7 kind 4): the
        // caller may retry, so the pending item is removed rather than
        // marked `failed` (that status is reserved for failures intrinsic
        // to the input, §7 kind 3).
        let dir = tempfile::tempdir().unwrap();
        let app = AppContext::new(test_config(dir.path())).unwrap();
        let space = app.create_space("user-1", "Travel", None).await.unwrap();

        let err = app.save_message("user-1", &space.space_id, "hello world", None).await.unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(_)));

        let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn save_file_with_unsupported_mime_marks_item_failed() {
        // `unsupported` is intrinsic to the input (§7 kind 3): the item is
        // kept with status `failed` and the reason recorded, not removed.
        let dir = tempfile::tempdir().unwrap();
        let app = AppContext::new(test_config(dir.path())).unwrap();
        let space = app.create_space("user-1", "Travel", None).await.unwrap();

        let err = app
            .save_file("user-1", &space.space_id, b"whatever", MimeFamily::Unknown, "file.bin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unsupported(_)));

        let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0].status, crate::models::ItemStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppContext::new(test_config(dir.path())).unwrap();
        let space = app.create_space("user-1", "Travel", None).await.unwrap();

        let big = vec![0u8; (extract::MAX_INPUT_BYTES + 1) as usize];
        let err = app
            .save_file("user-1", &space.space_id, &big, MimeFamily::Plain, "big.txt", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TooLarge));

        let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn delete_item_is_idempotent_at_app_layer() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppContext::new(test_config(dir.path())).unwrap();
        let space = app.create_space("user-1", "Travel", None).await.unwrap();

        app.delete_item("user-1", &space.space_id, "nonexistent").await.unwrap();
        app.delete_item("user-1", &space.space_id, "nonexistent").await.unwrap();
    }
}
