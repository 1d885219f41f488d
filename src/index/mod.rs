//! Per-owner vector index
//!
//! Every owner gets an independent collection persisted under
//! `<root>/user_<owner>/`. Operations for one owner are serialized through
//! that owner's read/write lock; different owners never contend beyond a
//! brief registry lookup.
//!
//! At most `max_open` idle collections stay open. Beyond that the least
//! recently used ones are closed and reopened lazily on their next use.

mod codec;
mod store;

pub use store::{CollectionStore, INDEX_FILE};

use crate::error::{RagError, Result};
use crate::types::{DocumentId, EmbeddedChunk, OwnerId, ScoredChunk, StoredChunk};
use scheduled_thread_pool::ScheduledThreadPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Lifecycle of one owner's collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Not opened by this process
    Uninitialized,
    /// Open with storage on disk
    Active,
    /// Destroyed by `clear`; recreated by the next add or query
    Cleared,
}

enum CollectionState {
    Uninitialized,
    Active(Arc<CollectionStore>),
    Cleared,
}

impl CollectionState {
    fn status(&self) -> CollectionStatus {
        match self {
            CollectionState::Uninitialized => CollectionStatus::Uninitialized,
            CollectionState::Active(_) => CollectionStatus::Active,
            CollectionState::Cleared => CollectionStatus::Cleared,
        }
    }
}

type Slot = Arc<RwLock<CollectionState>>;

/// Idle collections kept open by default
pub const DEFAULT_MAX_OPEN_COLLECTIONS: usize = 64;

/// Threads shared by every collection's connection pool
const STORAGE_WORKERS: usize = 2;

struct Entry {
    slot: Slot,
    last_used: u64,
}

#[derive(Default)]
struct Registry {
    entries: ahash::HashMap<OwnerId, Entry>,
    clock: u64,
}

/// Persistent, owner-partitioned store of embedded chunks
pub struct VectorIndex {
    root: PathBuf,
    registry: Mutex<Registry>,
    workers: Arc<ScheduledThreadPool>,
    max_open: usize,
}

impl VectorIndex {
    /// Create an index rooted at `root`; nothing is touched on disk until an
    /// owner's collection is first used
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_open(root, DEFAULT_MAX_OPEN_COLLECTIONS)
    }

    /// Like [`VectorIndex::new`], keeping at most `max_open` idle collections open
    pub fn with_max_open(root: impl Into<PathBuf>, max_open: usize) -> Self {
        Self {
            root: root.into(),
            registry: Mutex::new(Registry::default()),
            workers: Arc::new(ScheduledThreadPool::with_name(
                "ragdesk-storage-{}",
                STORAGE_WORKERS,
            )),
            max_open: max_open.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `owner`'s collection
    pub fn owner_dir(&self, owner: &OwnerId) -> PathBuf {
        self.root.join(owner.storage_dir_name())
    }

    async fn slot(&self, owner: &OwnerId) -> Slot {
        let mut registry = self.registry.lock().await;
        registry.clock += 1;
        let now = registry.clock;
        let entry = registry.entries.entry(owner.clone()).or_insert_with(|| Entry {
            slot: Arc::new(RwLock::new(CollectionState::Uninitialized)),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.slot)
    }

    /// Number of collections currently open and not in use
    pub async fn open_collections(&self) -> usize {
        let registry = self.registry.lock().await;
        registry
            .entries
            .values()
            .filter(|entry| {
                entry
                    .slot
                    .try_read()
                    .map(|state| matches!(*state, CollectionState::Active(_)))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Current lifecycle state of `owner`'s collection
    pub async fn status(&self, owner: &OwnerId) -> CollectionStatus {
        let slot = self.slot(owner).await;
        let state = slot.read().await;
        state.status()
    }

    /// Store `chunks` for `document_id`, returning how many were stored.
    ///
    /// The call is atomic: on error nothing from it is visible.
    pub async fn add(
        &self,
        owner: &OwnerId,
        document_id: &DocumentId,
        source: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let slot = self.slot(owner).await;
        let mut state = slot.write().await;
        let store = self.activate(owner, &mut state).await?;

        let doc = document_id.clone();
        let source = source.to_string();
        let stored = run_blocking(owner, move || store.insert(&doc, &source, &chunks))
            .await
            .map_err(|e| storage_error(owner, e))?;

        debug!(owner = %owner, document_id = %document_id, chunk_count = stored, "chunks added");
        Ok(stored)
    }

    /// Up to `k` chunks most similar to `vector`, best first
    pub async fn query(
        &self,
        owner: &OwnerId,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let slot = self.slot(owner).await;

        let state = {
            let state = slot.read().await;
            if matches!(*state, CollectionState::Active(_)) {
                state
            } else {
                drop(state);
                let mut state = slot.write().await;
                self.activate(owner, &mut state).await?;
                state.downgrade()
            }
        };

        let CollectionState::Active(store) = &*state else {
            return Err(RagError::index_io(owner, "collection not active"));
        };
        let store = Arc::clone(store);
        let query = vector.to_vec();
        let hits = run_blocking(owner, move || store.search(&query, k))
            .await
            .map_err(|e| storage_error(owner, e))?;

        debug!(owner = %owner, k, hits = hits.len(), "index queried");
        Ok(hits)
    }

    /// Remove every chunk of `document_id`, returning how many were removed.
    ///
    /// Never creates storage; an absent collection removes nothing.
    pub async fn delete_by_document(
        &self,
        owner: &OwnerId,
        document_id: &DocumentId,
    ) -> Result<usize> {
        let slot = self.slot(owner).await;
        let mut state = slot.write().await;
        let Some(store) = self.open_existing(owner, &mut state).await? else {
            return Ok(0);
        };

        let doc = document_id.clone();
        let removed = run_blocking(owner, move || store.delete_document(&doc))
            .await
            .map_err(|e| storage_error(owner, e))?;

        info!(owner = %owner, document_id = %document_id, removed, "document chunks deleted");
        Ok(removed)
    }

    /// Destroy `owner`'s collection and its storage directory.
    ///
    /// If the directory cannot be removed the collection is reopened and
    /// stays active.
    pub async fn clear(&self, owner: &OwnerId) -> Result<()> {
        self.clear_with(owner, remove_collection_dir).await
    }

    async fn clear_with(
        &self,
        owner: &OwnerId,
        remove: fn(&Path) -> std::io::Result<()>,
    ) -> Result<()> {
        let slot = self.slot(owner).await;
        let mut state = slot.write().await;
        let dir = self.owner_dir(owner);

        match std::mem::replace(&mut *state, CollectionState::Cleared) {
            CollectionState::Active(store) => {
                // Release every pooled connection before removing files
                drop(store);
            }
            CollectionState::Cleared => {
                if !dir.exists() {
                    return Ok(());
                }
            }
            CollectionState::Uninitialized => {
                if !dir.exists() {
                    *state = CollectionState::Uninitialized;
                    debug!(owner = %owner, "clear of absent collection");
                    return Ok(());
                }
            }
        }

        let target = dir.clone();
        let removal = tokio::task::spawn_blocking(move || remove(&target))
            .await
            .map_err(|e| RagError::index_io(owner, format!("clear task failed: {}", e)))
            .and_then(|r| {
                r.map_err(|e| {
                    RagError::index_io(
                        owner,
                        format!("failed to remove {}: {}", dir.display(), e),
                    )
                })
            });

        match removal {
            Ok(()) => {
                info!(owner = %owner, "collection cleared");
                Ok(())
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "clear failed, reopening collection");
                *state = match self.reopen_after_failed_clear(owner).await {
                    Ok(store) => CollectionState::Active(store),
                    Err(reopen) => {
                        warn!(
                            owner = %owner,
                            error = %reopen,
                            "collection could not be reopened after failed clear"
                        );
                        CollectionState::Uninitialized
                    }
                };
                Err(e)
            }
        }
    }

    /// Number of chunks stored for `owner`; never creates storage
    pub async fn count(&self, owner: &OwnerId) -> Result<usize> {
        let slot = self.slot(owner).await;
        let state = self.read_existing(owner, &slot).await?;

        let CollectionState::Active(store) = &*state else {
            return Ok(0);
        };
        let store = Arc::clone(store);
        run_blocking(owner, move || store.count())
            .await
            .map_err(|e| storage_error(owner, e))
    }

    /// Chunks of one document in sequence order; empty if the collection
    /// does not exist
    pub async fn document_chunks(
        &self,
        owner: &OwnerId,
        document_id: &DocumentId,
    ) -> Result<Vec<StoredChunk>> {
        let slot = self.slot(owner).await;
        let state = self.read_existing(owner, &slot).await?;

        let CollectionState::Active(store) = &*state else {
            return Ok(Vec::new());
        };
        let store = Arc::clone(store);
        let doc = document_id.clone();
        run_blocking(owner, move || store.document_chunks(&doc))
            .await
            .map_err(|e| storage_error(owner, e))
    }

    /// Read guard for `slot`, first opening storage left by a previous
    /// process if there is any
    async fn read_existing<'a>(
        &self,
        owner: &OwnerId,
        slot: &'a RwLock<CollectionState>,
    ) -> Result<RwLockReadGuard<'a, CollectionState>> {
        let uninitialized = matches!(*slot.read().await, CollectionState::Uninitialized);
        if uninitialized {
            let mut state = slot.write().await;
            self.open_existing(owner, &mut state).await?;
            return Ok(state.downgrade());
        }
        Ok(slot.read().await)
    }

    /// Return the active store, creating the collection if needed
    async fn activate(
        &self,
        owner: &OwnerId,
        state: &mut CollectionState,
    ) -> Result<Arc<CollectionStore>> {
        if let CollectionState::Active(store) = state {
            return Ok(Arc::clone(store));
        }

        let store = self.open_store(owner).await?;
        info!(
            owner = %owner,
            collection = %owner.collection_name(),
            "collection opened"
        );
        *state = CollectionState::Active(Arc::clone(&store));
        self.close_idle(owner).await;
        Ok(store)
    }

    /// Close the least recently used idle collections beyond `max_open` and
    /// forget owners with nothing open.
    ///
    /// Slots that are locked or referenced by an in-flight call are skipped.
    async fn close_idle(&self, keep: &OwnerId) {
        let mut registry = self.registry.lock().await;

        let mut idle = Vec::new();
        let mut forgotten = Vec::new();
        for (owner, entry) in registry.entries.iter() {
            if owner == keep {
                continue;
            }
            let Ok(state) = entry.slot.try_read() else {
                continue;
            };
            match *state {
                CollectionState::Active(_) => idle.push((entry.last_used, owner.clone())),
                _ if Arc::strong_count(&entry.slot) == 1 => forgotten.push(owner.clone()),
                _ => {}
            }
        }

        // `keep` holds one of the open slots
        let excess = (idle.len() + 1).saturating_sub(self.max_open);
        idle.sort_unstable();
        for (_, owner) in idle.into_iter().take(excess) {
            let Some(entry) = registry.entries.get(&owner) else {
                continue;
            };
            let Ok(mut state) = entry.slot.try_write() else {
                continue;
            };
            *state = CollectionState::Uninitialized;
            drop(state);
            debug!(owner = %owner, "idle collection closed");
            if Arc::strong_count(&entry.slot) == 1 {
                forgotten.push(owner);
            }
        }

        for owner in forgotten {
            registry.entries.remove(&owner);
        }
    }

    /// Return the active store, opening it only if storage already exists
    async fn open_existing(
        &self,
        owner: &OwnerId,
        state: &mut CollectionState,
    ) -> Result<Option<Arc<CollectionStore>>> {
        match state {
            CollectionState::Active(store) => Ok(Some(Arc::clone(store))),
            CollectionState::Cleared => Ok(None),
            CollectionState::Uninitialized => {
                if !self.owner_dir(owner).join(INDEX_FILE).exists() {
                    return Ok(None);
                }
                self.activate(owner, state).await.map(Some)
            }
        }
    }

    async fn open_store(&self, owner: &OwnerId) -> Result<Arc<CollectionStore>> {
        let dir = self.owner_dir(owner);
        let id = owner.clone();
        let workers = Arc::clone(&self.workers);
        run_blocking(owner, move || CollectionStore::open(&id, &dir, &workers))
            .await
            .map(Arc::new)
            .map_err(|e| storage_error(owner, e))
    }

    async fn reopen_after_failed_clear(&self, owner: &OwnerId) -> Result<Arc<CollectionStore>> {
        let dir = self.owner_dir(owner);
        run_blocking(owner, move || discard_orphaned_journal(&dir))
            .await
            .map_err(|e| storage_error(owner, e))?;
        self.open_store(owner).await
    }
}

fn remove_collection_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::remove_dir_all(dir)
}

/// Remove WAL sidecar files whose database file is already gone
fn discard_orphaned_journal(dir: &Path) -> Result<()> {
    if dir.join(INDEX_FILE).exists() {
        return Ok(());
    }
    for suffix in ["-wal", "-shm"] {
        let path = dir.join(format!("{}{}", INDEX_FILE, suffix));
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "orphaned journal file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RagError::Io {
                    source: e,
                    context: format!("Failed to remove {}", path.display()),
                })
            }
        }
    }
    Ok(())
}

async fn run_blocking<T, F>(owner: &OwnerId, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RagError::index_io(owner, format!("storage task failed: {}", e)))?
}

/// Report raw SQLite and filesystem failures as index I/O failures
fn storage_error(owner: &OwnerId, error: RagError) -> RagError {
    match error {
        RagError::Database(e) => RagError::index_io(owner, e.to_string()),
        RagError::Io { source, context } => {
            RagError::index_io(owner, format!("{}: {}", context, source))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunks(texts: &[&str], vector: &[f32]) -> Vec<EmbeddedChunk> {
        texts
            .iter()
            .map(|t| EmbeddedChunk::new(*t, vector.to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(1);

        assert_eq!(index.status(&owner).await, CollectionStatus::Uninitialized);
        assert_eq!(index.count(&owner).await.unwrap(), 0);
        assert!(!index.owner_dir(&owner).exists());

        index
            .add(&owner, &DocumentId::from(1), "a.txt", chunks(&["a"], &[1.0]))
            .await
            .unwrap();
        assert_eq!(index.status(&owner).await, CollectionStatus::Active);
        assert!(index.owner_dir(&owner).join(INDEX_FILE).exists());

        index.clear(&owner).await.unwrap();
        assert_eq!(index.status(&owner).await, CollectionStatus::Cleared);
        assert!(!index.owner_dir(&owner).exists());
        assert_eq!(index.count(&owner).await.unwrap(), 0);

        assert!(index.query(&owner, &[1.0], 5).await.unwrap().is_empty());
        assert_eq!(index.status(&owner).await, CollectionStatus::Active);
    }

    #[tokio::test]
    async fn test_clear_never_created_is_noop() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(3);

        index.clear(&owner).await.unwrap();
        assert_eq!(index.status(&owner).await, CollectionStatus::Uninitialized);
        assert!(!temp.path().join("user_3").exists());
    }

    #[tokio::test]
    async fn test_delete_without_collection_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(4);

        let removed = index
            .delete_by_document(&owner, &DocumentId::from(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(!index.owner_dir(&owner).exists());
    }

    #[tokio::test]
    async fn test_reopens_collection_from_previous_process() {
        let temp = TempDir::new().unwrap();
        let owner = OwnerId::from(5);
        {
            let index = VectorIndex::new(temp.path());
            index
                .add(
                    &owner,
                    &DocumentId::from(1),
                    "a.txt",
                    chunks(&["a", "b"], &[1.0, 0.0]),
                )
                .await
                .unwrap();
        }

        let index = VectorIndex::new(temp.path());
        assert_eq!(index.status(&owner).await, CollectionStatus::Uninitialized);
        assert_eq!(index.count(&owner).await.unwrap(), 2);

        index.clear(&owner).await.unwrap();
        assert_eq!(index.count(&owner).await.unwrap(), 0);
        assert!(!index.owner_dir(&owner).exists());
    }

    #[tokio::test]
    async fn test_sequences_continue_across_adds() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(6);
        let doc = DocumentId::from(2);

        index
            .add(&owner, &doc, "a.txt", chunks(&["a", "b"], &[1.0]))
            .await
            .unwrap();
        index
            .add(&owner, &doc, "a.txt", chunks(&["c"], &[1.0]))
            .await
            .unwrap();

        let stored = index.document_chunks(&owner, &doc).await.unwrap();
        let sequences: Vec<u32> = stored.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(stored.iter().all(|c| c.source == "a.txt"));
    }

    fn refuse_removal(_dir: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "directory is busy",
        ))
    }

    fn remove_database_then_fail(dir: &Path) -> std::io::Result<()> {
        std::fs::remove_file(dir.join(INDEX_FILE))?;
        std::fs::write(dir.join(format!("{}-wal", INDEX_FILE)), b"stale journal")?;
        Err(std::io::Error::new(std::io::ErrorKind::Other, "interrupted"))
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_collection_active() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(10);

        index
            .add(&owner, &DocumentId::from(1), "a.txt", chunks(&["a", "b"], &[1.0]))
            .await
            .unwrap();

        let err = index.clear_with(&owner, refuse_removal).await.unwrap_err();
        assert!(matches!(err, RagError::IndexIo { .. }));
        assert_eq!(index.status(&owner).await, CollectionStatus::Active);
        assert_eq!(index.count(&owner).await.unwrap(), 2);

        // A retry with a working filesystem succeeds
        index.clear(&owner).await.unwrap();
        assert_eq!(index.status(&owner).await, CollectionStatus::Cleared);
        assert!(!index.owner_dir(&owner).exists());
    }

    #[tokio::test]
    async fn test_failed_clear_discards_orphaned_journal() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(11);

        index
            .add(&owner, &DocumentId::from(1), "a.txt", chunks(&["a"], &[1.0]))
            .await
            .unwrap();

        let err = index
            .clear_with(&owner, remove_database_then_fail)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexIo { .. }));
        assert_eq!(index.status(&owner).await, CollectionStatus::Active);
        assert_eq!(index.count(&owner).await.unwrap(), 0);

        let wal = index.owner_dir(&owner).join(format!("{}-wal", INDEX_FILE));
        let contents = std::fs::read(&wal).unwrap_or_default();
        assert_ne!(contents, b"stale journal".to_vec());

        index
            .add(&owner, &DocumentId::from(2), "b.txt", chunks(&["b"], &[1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(index.count(&owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_idle_collections_are_closed() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::with_max_open(temp.path(), 4);

        for n in 0..40u64 {
            index
                .add(
                    &OwnerId::from(n),
                    &DocumentId::from(1),
                    "a.txt",
                    chunks(&["a"], &[1.0, 0.0]),
                )
                .await
                .unwrap();
            assert!(index.open_collections().await <= 4);
        }

        // Closed owners are forgotten; each open pool holds one worker handle
        assert!(index.registry.lock().await.entries.len() <= 4);
        assert!(Arc::strong_count(&index.workers) <= 1 + 4);
        assert_eq!(
            index.status(&OwnerId::from(0)).await,
            CollectionStatus::Uninitialized
        );
        assert_eq!(
            index.status(&OwnerId::from(39)).await,
            CollectionStatus::Active
        );

        // Closed collections reopen on demand with their data intact
        for n in 0..40u64 {
            assert_eq!(index.count(&OwnerId::from(n)).await.unwrap(), 1);
        }
        let hits = index.query(&OwnerId::from(0), &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.open_collections().await <= 4);
    }

    #[tokio::test]
    async fn test_corrupt_storage_reports_index_io() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::new(temp.path());
        let owner = OwnerId::from(8);

        let dir = index.owner_dir(&owner);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INDEX_FILE), vec![0xAB; 4096]).unwrap();

        let err = index.query(&owner, &[1.0], 3).await.unwrap_err();
        assert!(matches!(err, RagError::IndexIo { .. }));
        assert_ne!(index.status(&owner).await, CollectionStatus::Active);
    }
}
