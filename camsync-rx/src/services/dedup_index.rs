//! Persisted fingerprint → path index
//!
//! Maps SHA-256 content fingerprints to the one canonical file holding that
//! content. The map is mirrored in memory (loaded lazily on first use) and
//! persisted as a JSON object `{ "<hex>": "<absolute path>" }` via atomic
//! replace.
//!
//! Writes are last-writer-wins per key. The index does not make a caller's
//! lookup-then-record sequence atomic: two concurrent uploads of identical
//! bytes can both see `Fresh`.

use camsync_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::models::Fingerprint;

/// File name of the index inside the storage root
pub const INDEX_FILE_NAME: &str = ".dedup_index.json";

/// Result of an index lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Content already stored at this path
    Duplicate(PathBuf),
    /// No live file holds this content
    Fresh,
}

/// How soon a mutation must reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Write the index before returning
    Immediate,
    /// Hand off to the background flusher
    Deferred,
}

#[derive(Debug)]
struct IndexState {
    file: PathBuf,
    /// `None` until the backing file has been read successfully
    entries: Option<HashMap<Fingerprint, PathBuf>>,
    /// Mappings recorded while `entries` is unloaded; merged on load
    pending: HashMap<Fingerprint, PathBuf>,
    dirty: bool,
}

impl IndexState {
    fn get(&self, fingerprint: &Fingerprint) -> Option<&PathBuf> {
        self.pending
            .get(fingerprint)
            .or_else(|| self.entries.as_ref()?.get(fingerprint))
    }
}

#[derive(Debug)]
struct IndexInner {
    state: Mutex<IndexState>,
    /// Serializes snapshot+write so an older snapshot never lands last
    writer: Mutex<()>,
}

struct FlushRequest {
    done: Option<oneshot::Sender<()>>,
}

/// Shared dedup index handle
#[derive(Debug, Clone)]
pub struct DedupIndex {
    inner: Arc<IndexInner>,
    flush_tx: mpsc::Sender<FlushRequest>,
}

impl std::fmt::Debug for FlushRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushRequest")
            .field("awaited", &self.done.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DedupIndex {
    /// Open the index stored at `file`
    ///
    /// Nothing is read until the first lookup or record. Spawns the
    /// background flusher, so this must run inside a Tokio runtime.
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let inner = Arc::new(IndexInner {
            state: Mutex::new(IndexState {
                file: file.into(),
                entries: None,
                pending: HashMap::new(),
                dirty: false,
            }),
            writer: Mutex::new(()),
        });

        // Capacity 1: a queued deferred flush already covers later mutations
        let (flush_tx, flush_rx) = mpsc::channel(1);
        tokio::spawn(run_flusher(Arc::clone(&inner), flush_rx));

        Self { inner, flush_tx }
    }

    /// Open the index file inside a storage root
    pub fn open_in(root: &Path) -> Self {
        Self::open(root.join(INDEX_FILE_NAME))
    }

    /// Path of the backing file
    pub fn file(&self) -> PathBuf {
        lock(&self.inner.state).file.clone()
    }

    /// Check whether `fingerprint` resolves to an existing file
    ///
    /// A mapping whose file has disappeared is removed (with a deferred
    /// flush) and reported as `Fresh`.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Lookup {
        self.ensure_loaded().await;

        let candidate = lock(&self.inner.state).get(fingerprint).cloned();

        let Some(path) = candidate else {
            return Lookup::Fresh;
        };

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(fingerprint = %fingerprint, path = %path.display(), "Duplicate content");
            return Lookup::Duplicate(path);
        }

        let removed = {
            let mut state = lock(&self.inner.state);
            // Only drop the mapping we checked; a concurrent record wins
            let still_same = state.get(fingerprint) == Some(&path);
            if still_same {
                state.pending.remove(fingerprint);
                if let Some(entries) = state.entries.as_mut() {
                    entries.remove(fingerprint);
                }
                state.dirty = true;
            }
            still_same
        };

        if removed {
            info!(
                fingerprint = %fingerprint,
                path = %path.display(),
                "Removed stale index entry (file missing)"
            );
            self.schedule_flush();
        }
        Lookup::Fresh
    }

    /// Map `fingerprint` to `path`, overwriting any previous mapping
    ///
    /// Persistence failures are logged; the in-memory mapping stays.
    pub async fn record(&self, fingerprint: Fingerprint, path: PathBuf, durability: Durability) {
        self.ensure_loaded().await;

        {
            let mut state = lock(&self.inner.state);
            match state.entries.as_mut() {
                Some(entries) => {
                    entries.insert(fingerprint, path.clone());
                }
                None => {
                    // Unloaded (read failure or concurrent relocate): the
                    // on-disk map must not be replaced by this one entry
                    state.pending.insert(fingerprint, path.clone());
                }
            }
            state.dirty = true;
        }
        debug!(fingerprint = %fingerprint, path = %path.display(), ?durability, "Index entry recorded");

        match durability {
            Durability::Immediate => {
                if let Err(e) = self.persist().await {
                    warn!(error = %e, "Index write failed; keeping in-memory state");
                }
            }
            Durability::Deferred => self.schedule_flush(),
        }
    }

    /// Write the full map to disk via temp file + rename
    pub async fn persist(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || persist_blocking(&inner))
            .await
            .map_err(|e| Error::Internal(format!("Index persist task failed: {}", e)))?
    }

    /// Wait until every mutation made so far has been flushed
    pub async fn wait_idle(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let request = FlushRequest {
            done: Some(done_tx),
        };
        if self.flush_tx.send(request).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Mapping for `fingerprint` without checking the file exists
    pub async fn resolve(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        self.ensure_loaded().await;
        lock(&self.inner.state).get(fingerprint).cloned()
    }

    /// Number of mappings
    pub async fn len(&self) -> usize {
        self.ensure_loaded().await;
        let state = lock(&self.inner.state);
        match state.entries.as_ref() {
            Some(entries) => entries.len(),
            None => state.pending.len(),
        }
    }

    /// Flush, then point the index at a different file
    ///
    /// The new file is loaded lazily; mappings from the old file are not
    /// carried over.
    pub async fn relocate(&self, file: PathBuf) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Index write before relocation failed");
        }
        let _writer = lock(&self.inner.writer);
        let mut state = lock(&self.inner.state);
        info!(
            from = %state.file.display(),
            to = %file.display(),
            "Dedup index relocated"
        );
        state.file = file;
        state.entries = None;
        state.pending.clear();
        state.dirty = false;
    }

    fn schedule_flush(&self) {
        // Full channel means a flush is already queued and will see this change
        let _ = self.flush_tx.try_send(FlushRequest { done: None });
    }

    async fn ensure_loaded(&self) {
        let file = {
            let state = lock(&self.inner.state);
            if state.entries.is_some() {
                return;
            }
            state.file.clone()
        };

        let loaded = match tokio::task::spawn_blocking({
            let file = file.clone();
            move || read_index_file(&file)
        })
        .await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(Error::Json(e))) => {
                warn!(file = %file.display(), error = %e, "Corrupt dedup index, starting empty");
                HashMap::new()
            }
            Ok(Err(e)) => {
                // Left unloaded: nothing is written until a read succeeds
                warn!(file = %file.display(), error = %e, "Dedup index unreadable, will retry");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dedup index load task failed, will retry");
                return;
            }
        };

        let merged = {
            let mut state = lock(&self.inner.state);
            if state.entries.is_some() || state.file != file {
                return;
            }
            let mut entries = loaded;
            let merged = state.pending.len();
            entries.extend(state.pending.drain());
            info!(file = %file.display(), entries = entries.len(), merged, "Dedup index loaded");
            state.entries = Some(entries);
            merged
        };
        if merged > 0 {
            self.schedule_flush();
        }
    }
}

async fn run_flusher(inner: Arc<IndexInner>, mut rx: mpsc::Receiver<FlushRequest>) {
    while let Some(request) = rx.recv().await {
        let task_inner = Arc::clone(&inner);
        match tokio::task::spawn_blocking(move || persist_blocking(&task_inner)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Deferred index flush failed"),
            Err(e) => warn!(error = %e, "Deferred index flush task failed"),
        }
        if let Some(done) = request.done {
            let _ = done.send(());
        }
    }
    debug!("Dedup index flusher stopped");
}

fn persist_blocking(inner: &IndexInner) -> Result<()> {
    let _writer = lock(&inner.writer);
    match stage_snapshot(inner)? {
        Some(staged) => {
            if let Err(e) = staged.commit() {
                lock(&inner.state).dirty = true;
                return Err(e);
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Serialize the current map into a temp file beside the index
///
/// Returns `None` when there is nothing to write: the cache was never
/// loaded (writing would clobber the on-disk file with an empty map) or no
/// mutation happened since the last flush.
fn stage_snapshot(inner: &IndexInner) -> Result<Option<camsync_common::fs::StagedWrite>> {
    let (file, document) = {
        let mut state = lock(&inner.state);
        if !state.dirty {
            return Ok(None);
        }
        let Some(entries) = state.entries.as_ref() else {
            return Ok(None);
        };
        let document: BTreeMap<String, String> = entries
            .iter()
            .map(|(fp, path)| (fp.to_hex(), path.to_string_lossy().into_owned()))
            .collect();
        state.dirty = false;
        (state.file.clone(), document)
    };

    let bytes = match serde_json::to_vec_pretty(&document) {
        Ok(bytes) => bytes,
        Err(e) => {
            lock(&inner.state).dirty = true;
            return Err(e.into());
        }
    };
    match camsync_common::fs::stage_atomic(&file, &bytes) {
        Ok(staged) => {
            debug!(file = %file.display(), entries = document.len(), "Index snapshot staged");
            Ok(Some(staged))
        }
        Err(e) => {
            lock(&inner.state).dirty = true;
            Err(e)
        }
    }
}

fn read_index_file(file: &Path) -> Result<HashMap<Fingerprint, PathBuf>> {
    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let document: BTreeMap<String, PathBuf> = serde_json::from_slice(&bytes)?;
    let mut entries = HashMap::with_capacity(document.len());
    for (key, path) in document {
        match key.parse::<Fingerprint>() {
            Ok(fp) => {
                entries.insert(fp, path);
            }
            Err(e) => warn!(error = %e, "Skipping malformed index key"),
        }
    }
    Ok(entries)
}
