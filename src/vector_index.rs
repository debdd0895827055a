//! The per-user approximate-nearest-neighbor index (§4.3).
//!
//! Wraps the `hora` crate's `HNSWIndex` with an id→payload map and a
//! `dump`/`load` on-disk snapshot: bidirectional `forward`/`reverse` maps
//! keyed by item-id, per-vector space-id metadata, tombstone-based soft
//! delete, and threshold-triggered compaction. This version of `hora`'s
//! `search` returns candidate ids without distances, so this module also
//! keeps the raw unit vectors alongside the ANN payload and recomputes the
//! exact inner product for surviving candidates — giving callers a real
//! cosine score, not an ANN-internal approximation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::CoreError;

/// Fraction of tombstoned entries that triggers a compaction rebuild (§4.3).
const COMPACTION_THRESHOLD: f64 = 0.25;

/// A single search hit: the owning item, and its exact cosine similarity
/// to the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub item_id: String,
    pub space_id: String,
    pub score: f32,
}

/// Bincode-serializable snapshot of everything except the ANN payload
/// itself, which `hora` dumps to its own file.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct Snapshot {
    dims: usize,
    next_id: u64,
    forward: HashMap<usize, (String, String)>,
    reverse: HashMap<String, usize>,
    tombstones: HashSet<usize>,
    vectors: HashMap<usize, Vec<f32>>,
}

struct State {
    ann: HNSWIndex<f32, usize>,
    dims: usize,
    next_id: u64,
    forward: HashMap<usize, (String, String)>,
    reverse: HashMap<String, usize>,
    tombstones: HashSet<usize>,
    vectors: HashMap<usize, Vec<f32>>,
    /// hora requires `build()` before `search()` observes newly added points.
    dirty: bool,
}

impl State {
    fn empty(dims: usize) -> Self {
        Self {
            ann: HNSWIndex::new(dims, &HNSWParams::default()),
            dims,
            next_id: 0,
            forward: HashMap::new(),
            reverse: HashMap::new(),
            tombstones: HashSet::new(),
            vectors: HashMap::new(),
            dirty: false,
        }
    }

    fn ensure_built(&mut self) {
        if self.dirty && !self.forward.is_empty() {
            // hora's build() consumes/fixes the graph; errors here only occur
            // on the library's own internal invariant violations.
            let _ = self.ann.build(Metric::DotProduct);
            self.dirty = false;
        }
    }

    fn live_count(&self) -> usize {
        self.forward.len()
    }

    fn tombstone_ratio(&self) -> f64 {
        let total = self.forward.len() + self.tombstones.len();
        if total == 0 {
            0.0
        } else {
            self.tombstones.len() as f64 / total as f64
        }
    }
}

/// The per-user VectorIndex. Many concurrent readers (`search`,
/// `global_search`); at most one writer (`add`, `delete`, `persist`,
/// `compact`) at a time, per the readers-writer discipline in §4.3/§5.
pub struct VectorIndex {
    state: RwLock<State>,
    snapshot_path: PathBuf,
}

fn validate_vector(v: &[f32], dims: usize) -> Result<(), CoreError> {
    if v.len() != dims {
        return Err(CoreError::Internal(format!(
            "dimension mismatch: expected {dims}, got {}",
            v.len()
        )));
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if (norm - 1.0).abs() > 1e-3 {
        return Err(CoreError::Internal(format!("vector is not unit-normalized (norm = {norm})")));
    }
    Ok(())
}

impl VectorIndex {
    /// Creates an empty index for a fresh user, backed by `snapshot_path`
    /// (which need not exist yet).
    pub fn new(dims: usize, snapshot_path: impl Into<PathBuf>) -> Self {
        Self { state: RwLock::new(State::empty(dims)), snapshot_path: snapshot_path.into() }
    }

    fn meta_path(&self) -> PathBuf {
        self.snapshot_path.with_extension("meta.bin")
    }

    fn ann_path(&self) -> PathBuf {
        self.snapshot_path.with_extension("hnsw.bin")
    }

    /// Restores the working copy from disk. A missing snapshot yields an
    /// empty index rather than an error.
    pub async fn load(dims: usize, snapshot_path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let snapshot_path = snapshot_path.into();
        let meta_path = snapshot_path.with_extension("meta.bin");
        let ann_path = snapshot_path.with_extension("hnsw.bin");

        let raw = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!(path = %meta_path.display(), "no existing snapshot; starting empty index");
                return Ok(Self::new(dims, snapshot_path));
            }
        };

        if raw.len() < 32 {
            warn!(path = %meta_path.display(), "snapshot too short to contain a checksum; discarding");
            return Ok(Self::new(dims, snapshot_path));
        }
        let (body, checksum) = raw.split_at(raw.len() - 32);
        let computed = Sha256::digest(body);
        if computed.as_slice() != checksum {
            warn!(path = %meta_path.display(), "snapshot checksum mismatch; discarding");
            return Ok(Self::new(dims, snapshot_path));
        }

        let (snapshot, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(body, bincode::config::standard())
                .map_err(|e| CoreError::Internal(format!("failed to decode snapshot: {e}")))?;

        if snapshot.dims != dims {
            return Err(CoreError::Internal(format!(
                "snapshot dimension {} does not match configured dimension {dims}",
                snapshot.dims
            )));
        }

        let mut ann = HNSWIndex::new(dims, &HNSWParams::default());
        if ann_path.exists() {
            if let Some(path_str) = ann_path.to_str() {
                let _ = HNSWIndex::<f32, usize>::load(path_str).map(|loaded| ann = loaded);
            }
        }

        let mut state = State {
            ann,
            dims,
            next_id: snapshot.next_id,
            forward: snapshot.forward,
            reverse: snapshot.reverse,
            tombstones: snapshot.tombstones,
            vectors: snapshot.vectors,
            dirty: true,
        };
        state.ensure_built();

        info!(path = %meta_path.display(), live = state.live_count(), "loaded vector index snapshot");
        Ok(Self { state: RwLock::new(state), snapshot_path })
    }

    /// `add(item_id, vector, space_id)`. Allocates a fresh internal-id and
    /// returns it as the item's `vector_ref`.
    pub async fn add(&self, item_id: &str, vector: Vec<f32>, space_id: &str) -> Result<u64, CoreError> {
        let mut state = self.state.write().await;
        validate_vector(&vector, state.dims)?;
        if state.reverse.contains_key(item_id) {
            return Err(CoreError::Conflict(format!("item_id {item_id} already indexed")));
        }

        let internal_id = state.next_id;
        state
            .ann
            .add(&vector, internal_id as usize)
            .map_err(|_| CoreError::Internal("ANN insert failed".to_string()))?;
        state.forward.insert(internal_id as usize, (item_id.to_string(), space_id.to_string()));
        state.reverse.insert(item_id.to_string(), internal_id as usize);
        state.vectors.insert(internal_id as usize, vector);
        state.next_id += 1;
        state.dirty = true;
        // Build while still holding the write guard so a concurrent reader
        // never observes a dirty graph (§4.3/§5: readers never wait on a
        // rebuild, only on the writer's own critical section).
        state.ensure_built();

        debug!(item_id, space_id, internal_id, "vector added");
        Ok(internal_id)
    }

    /// `delete(item_id)`. Unknown ids are a no-op and report `false`
    /// (informational, not an error, per §4.3/§7 kind 2).
    pub async fn delete(&self, item_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(internal_id) = state.reverse.remove(item_id) else {
            return false;
        };
        state.forward.remove(&internal_id);
        state.vectors.remove(&internal_id);
        state.tombstones.insert(internal_id);
        debug!(item_id, internal_id, "vector tombstoned");
        true
    }

    /// `search(query_vector, space_id, K)`. Over-fetches to tolerate
    /// post-filtering losses, then filters to live, space-matching hits.
    pub async fn search(&self, query_vector: &[f32], space_id: &str, k: usize) -> Result<Vec<Hit>, CoreError> {
        let hits = self.search_raw(query_vector, k).await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.space_id == space_id)
            .take(k)
            .collect())
    }

    /// `global_search(query_vector, user_id, K)`. No space filter — every
    /// entry in this index already belongs to one user.
    pub async fn global_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<Hit>, CoreError> {
        self.search_raw(query_vector, k).await.map(|mut hits| {
            hits.truncate(k);
            hits
        })
    }

    async fn search_raw(&self, query_vector: &[f32], k: usize) -> Result<Vec<Hit>, CoreError> {
        // Read-only: every writer (`add`/`compact`/`load`/`persist`) leaves
        // the graph built (`dirty == false`) before releasing its write
        // guard, so `search`/`global_search` never need to mutate `state`
        // and may run concurrently with one another (§4.3/§5).
        let state = self.state.read().await;
        validate_vector(query_vector, state.dims)?;
        if state.forward.is_empty() {
            return Ok(Vec::new());
        }

        let over_fetch = (4 * k).max(64);
        let candidates = state.ann.search(query_vector, over_fetch);

        let mut scored: Vec<(usize, String, String, f32)> = Vec::new();
        for internal_id in candidates {
            if state.tombstones.contains(&internal_id) {
                continue;
            }
            let Some((item_id, space_id)) = state.forward.get(&internal_id) else {
                continue;
            };
            let Some(vector) = state.vectors.get(&internal_id) else {
                continue;
            };
            let score: f32 = query_vector.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
            scored.push((internal_id, item_id.clone(), space_id.clone(), score));
        }

        // Sort by similarity descending, stable tie-break by lower internal-id.
        scored.sort_by(|a, b| {
            b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .map(|(_, item_id, space_id, score)| Hit { item_id, space_id, score })
            .collect())
    }

    /// Writes a consistent snapshot to disk: write-to-temp, then rename over
    /// the canonical path, so a crash mid-write leaves the prior snapshot
    /// intact.
    pub async fn persist(&self) -> Result<(), CoreError> {
        let (ann_dump_path, meta_bytes) = {
            let mut state = self.state.write().await;
            state.ensure_built();

            let snapshot = Snapshot {
                dims: state.dims,
                next_id: state.next_id,
                forward: state.forward.clone(),
                reverse: state.reverse.clone(),
                tombstones: state.tombstones.clone(),
                vectors: state.vectors.clone(),
            };

            let ann_path = self.ann_path();
            let ann_tmp = ann_path.with_extension("hnsw.bin.tmp");
            if let Some(path_str) = ann_tmp.to_str() {
                state.ann.dump(path_str).map_err(|e| CoreError::Internal(format!("ANN dump failed: {e}")))?;
            }

            let body = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
                .map_err(|e| CoreError::Internal(format!("failed to encode snapshot: {e}")))?;
            let checksum = Sha256::digest(&body);
            let mut out = body;
            out.extend_from_slice(&checksum);

            (ann_tmp, out)
        };

        if let Some(parent) = self.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Internal(format!("failed to create data directory: {e}")))?;
        }

        let meta_tmp = self.meta_path().with_extension("meta.bin.tmp");
        tokio::fs::write(&meta_tmp, &meta_bytes)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to write snapshot: {e}")))?;

        tokio::fs::rename(&ann_dump_path, self.ann_path())
            .await
            .map_err(|e| CoreError::Internal(format!("failed to commit ANN snapshot: {e}")))?;
        tokio::fs::rename(&meta_tmp, self.meta_path())
            .await
            .map_err(|e| CoreError::Internal(format!("failed to commit snapshot: {e}")))?;

        info!(path = %self.snapshot_path.display(), "vector index persisted");
        Ok(())
    }

    /// Rebuilds `ann` from live entries once the tombstone ratio crosses
    /// [`COMPACTION_THRESHOLD`], reclaiming degraded recall. Re-assigns
    /// internal-ids and persists before returning.
    pub async fn compact(&self) -> Result<bool, CoreError> {
        let should_compact = {
            let state = self.state.read().await;
            state.tombstone_ratio() >= COMPACTION_THRESHOLD
        };
        if !should_compact {
            return Ok(false);
        }

        {
            let mut state = self.state.write().await;
            let dims = state.dims;
            let mut new_ann = HNSWIndex::new(dims, &HNSWParams::default());
            let mut new_forward = HashMap::new();
            let mut new_reverse = HashMap::new();
            let mut new_vectors = HashMap::new();

            let mut live: Vec<(String, String, Vec<f32>)> = state
                .forward
                .iter()
                .filter_map(|(internal_id, (item_id, space_id))| {
                    state.vectors.get(internal_id).map(|v| (item_id.clone(), space_id.clone(), v.clone()))
                })
                .collect();
            live.sort_by(|a, b| a.0.cmp(&b.0));

            let mut next_id: u64 = 0;
            for (item_id, space_id, vector) in live {
                new_ann
                    .add(&vector, next_id as usize)
                    .map_err(|_| CoreError::Internal("ANN insert failed during compaction".to_string()))?;
                new_forward.insert(next_id as usize, (item_id.clone(), space_id));
                new_reverse.insert(item_id, next_id as usize);
                new_vectors.insert(next_id as usize, vector);
                next_id += 1;
            }

            state.ann = new_ann;
            state.forward = new_forward;
            state.reverse = new_reverse;
            state.vectors = new_vectors;
            state.tombstones.clear();
            state.next_id = next_id;
            state.dirty = true;
            state.ensure_built();

            info!(live = state.live_count(), "vector index compacted");
        }

        self.persist().await?;
        Ok(true)
    }

    pub async fn live_count(&self) -> usize {
        self.state.read().await.live_count()
    }

    pub async fn tombstone_ratio(&self) -> f64 {
        self.state.read().await.tombstone_ratio()
    }

    pub async fn contains(&self, item_id: &str) -> bool {
        self.state.read().await.reverse.contains_key(item_id)
    }
}

/// Checks whether a path already holds a persisted snapshot.
pub fn snapshot_exists(snapshot_path: &Path) -> bool {
    snapshot_path.with_extension("meta.bin").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in v.iter_mut() {
            *x /= n;
        }
        v
    }

    #[tokio::test]
    async fn add_then_search_returns_scoped_hit() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        let v = unit(vec![1.0, 0.0, 0.0]);
        idx.add("item-1", v.clone(), "space-a").await.unwrap();

        let hits = idx.search(&v, "space-a", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "item-1");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn search_filters_by_space() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        let v = unit(vec![1.0, 0.0, 0.0]);
        idx.add("item-1", v.clone(), "space-a").await.unwrap();
        idx.add("item-2", v.clone(), "space-b").await.unwrap();

        let hits = idx.search(&v, "space-a", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "item-1");
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        let v = unit(vec![0.0, 1.0, 0.0]);
        idx.add("item-1", v.clone(), "space-a").await.unwrap();

        assert!(idx.delete("item-1").await);
        assert!(!idx.delete("item-1").await);

        let hits = idx.search(&v, "space-a", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn duplicate_item_id_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        let v = unit(vec![1.0, 0.0, 0.0]);
        idx.add("item-1", v.clone(), "space-a").await.unwrap();
        let err = idx.add("item-1", v, "space-a").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn persist_and_load_round_trip_preserves_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap");
        let v1 = unit(vec![1.0, 0.0, 0.0]);
        let v2 = unit(vec![0.0, 1.0, 0.0]);

        {
            let idx = VectorIndex::new(3, &path);
            idx.add("item-1", v1.clone(), "space-a").await.unwrap();
            idx.add("item-2", v2.clone(), "space-a").await.unwrap();
            idx.persist().await.unwrap();
        }

        let reloaded = VectorIndex::load(3, &path).await.unwrap();
        let hits = reloaded.search(&v1, "space-a", 5).await.unwrap();
        assert_eq!(hits[0].item_id, "item-1");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn compaction_triggers_past_threshold_and_preserves_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        for i in 0..8 {
            let v = unit(vec![1.0, i as f32 * 0.01, 0.0]);
            idx.add(&format!("item-{i}"), v, "space-a").await.unwrap();
        }
        for i in 0..3 {
            idx.delete(&format!("item-{i}")).await;
        }

        assert!(idx.tombstone_ratio().await >= COMPACTION_THRESHOLD);
        let compacted = idx.compact().await.unwrap();
        assert!(compacted);
        assert_eq!(idx.tombstone_ratio().await, 0.0);
        assert_eq!(idx.live_count().await, 5);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::new(3, dir.path().join("snap"));
        let err = idx.add("item-1", vec![1.0, 0.0], "space-a").await.unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
