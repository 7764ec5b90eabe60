//! Tool index: the shared collection of tool records and its nearest-neighbour
//! search structure.
//!
//! # Visibility
//! Writes are staged. `insert` and `remove` become visible to `search` only
//! after `flush` completes, and nothing is searchable until `load` has built
//! the search structure. A search running concurrently with a flush sees
//! either the previous or the new committed state, never a mix.
//!
//! # Concurrency
//! Single writer, many readers: flush/load/close serialise on a writer lock,
//! searches take a short read lock to clone an `Arc` of the immutable search
//! structure and then run without holding any lock.

pub mod ivf;
pub mod metric;
pub mod record;

pub use ivf::{IndexKind, IndexParams};
pub use metric::{similarity_from_distance, DistanceMetric};
pub use record::{Metadata, QueryResult, ToolRecord};

use crate::embedding::Embedder;
use crate::error::{AppError, Result};
use crate::persistence;
use ivf::SearchableIndex;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum StagedChange {
    Upsert(ToolRecord),
    Remove,
}

#[derive(Default)]
struct IndexState {
    staged: BTreeMap<String, StagedChange>,
    committed: BTreeMap<String, ToolRecord>,
    searchable: Option<Arc<SearchableIndex>>,
    closed: bool,
}

pub struct ToolIndex {
    embedder: Arc<dyn Embedder>,
    params: IndexParams,
    snapshot_path: Option<PathBuf>,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
}

impl ToolIndex {
    /// Create an index. With a `snapshot_path`, flushes persist committed
    /// records there and `load` restores them.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        params: IndexParams,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            params,
            snapshot_path,
            state: RwLock::new(IndexState::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn in_memory(embedder: Arc<dyn Embedder>, params: IndexParams) -> Self {
        Self::new(embedder, params, None)
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.params.metric
    }

    /// Stage a record for insertion, embedding its description if no vector
    /// was supplied. Re-inserting an existing id overwrites it on flush.
    ///
    /// Returns the record id.
    pub fn insert(&self, mut record: ToolRecord) -> Result<String> {
        self.ensure_open()?;
        record.validate()?;

        let dim = self.dimension();
        if record.embedding.is_empty() {
            record.embedding = self.embedder.embed(&record.description)?;
        }
        if record.embedding.len() != dim {
            return Err(AppError::ValidationError(format!(
                "Embedding for '{}' has dimension {}, expected {}",
                record.id,
                record.embedding.len(),
                dim
            )));
        }

        let id = record.id.clone();
        let mut state = self.state.write();
        if state.closed {
            return Err(closed_error());
        }
        state.staged.insert(id.clone(), StagedChange::Upsert(record));

        tracing::debug!(id = %id, "Tool record staged");
        Ok(id)
    }

    /// Stage removal of `id`. Returns false if no such record is known.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write();
        if state.closed {
            return Err(closed_error());
        }

        let known = match state.staged.get(id) {
            Some(StagedChange::Upsert(_)) => true,
            Some(StagedChange::Remove) => false,
            None => state.committed.contains_key(id),
        };
        if known {
            state.staged.insert(id.to_string(), StagedChange::Remove);
            tracing::debug!(id = %id, "Tool record removal staged");
        }

        Ok(known)
    }

    /// Whether `id` exists, counting staged changes.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Record for `id`, counting staged changes.
    pub fn get(&self, id: &str) -> Option<ToolRecord> {
        let state = self.state.read();
        match state.staged.get(id) {
            Some(StagedChange::Upsert(record)) => Some(record.clone()),
            Some(StagedChange::Remove) => None,
            None => state.committed.get(id).cloned(),
        }
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.state.read().committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_changes(&self) -> usize {
        self.state.read().staged.len()
    }

    pub fn is_loaded(&self) -> bool {
        let state = self.state.read();
        !state.closed && state.searchable.is_some()
    }

    /// Commit staged changes, persist them, and refresh the search structure
    /// if the index is loaded. On a persistence failure nothing is committed
    /// and the staged changes are kept for a retry.
    pub fn flush(&self) -> Result<usize> {
        let _writer = self.writer.lock();

        let (staged, mut committed, loaded) = {
            let state = self.state.read();
            if state.closed {
                return Err(closed_error());
            }
            (
                state.staged.clone(),
                state.committed.clone(),
                state.searchable.is_some(),
            )
        };

        for (id, change) in &staged {
            match change {
                StagedChange::Upsert(record) => {
                    committed.insert(id.clone(), record.clone());
                }
                StagedChange::Remove => {
                    committed.remove(id);
                }
            }
        }

        if let Some(path) = &self.snapshot_path {
            persistence::save_records(
                path,
                self.embedder.model_id(),
                self.dimension(),
                committed.values().cloned().collect(),
            )?;
        }

        let searchable = loaded.then(|| self.build_searchable(&committed));

        let mut state = self.state.write();
        if state.closed {
            return Err(closed_error());
        }
        // Keep changes staged after the snapshot above was taken.
        for (id, change) in &staged {
            if state.staged.get(id) == Some(change) {
                state.staged.remove(id);
            }
        }
        state.committed = committed;
        if let Some(searchable) = searchable {
            state.searchable = Some(searchable);
        }
        let total = state.committed.len();
        drop(state);

        metrics::counter!("index_flushes_total").increment(1);
        tracing::info!(applied = staged.len(), total, "Tool index flushed");

        Ok(total)
    }

    /// Restore persisted records (if any) and build the search structure.
    /// Records already committed in memory take precedence over persisted ones.
    pub fn load(&self) -> Result<usize> {
        let _writer = self.writer.lock();

        let mut committed = BTreeMap::new();
        if let Some(path) = &self.snapshot_path {
            for record in
                persistence::load_records(path, self.embedder.model_id(), self.dimension())?
            {
                committed.insert(record.id.clone(), record);
            }
        }

        {
            let state = self.state.read();
            if state.closed {
                return Err(closed_error());
            }
            for (id, record) in &state.committed {
                committed.insert(id.clone(), record.clone());
            }
        }

        let searchable = self.build_searchable(&committed);

        let mut state = self.state.write();
        if state.closed {
            return Err(closed_error());
        }
        state.committed = committed;
        state.searchable = Some(searchable);
        let total = state.committed.len();
        drop(state);

        tracing::info!(
            records = total,
            metric = %self.params.metric,
            kind = ?self.params.kind,
            "Tool index loaded"
        );

        Ok(total)
    }

    /// Up to `k` committed records nearest to `query`, closest first, with
    /// their distance under the configured metric.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ToolRecord, f32)>> {
        let searchable = {
            let state = self.state.read();
            if state.closed {
                return Err(closed_error());
            }
            state.searchable.clone().ok_or_else(|| {
                AppError::IndexNotReady("load() must complete before searching".to_string())
            })?
        };

        if query.len() != self.dimension() {
            return Err(AppError::ValidationError(format!(
                "Query vector has dimension {}, expected {}",
                query.len(),
                self.dimension()
            )));
        }

        Ok(searchable.search(query, k))
    }

    /// Tear the index down. Staged changes are discarded; every later call fails
    /// with `IndexUnavailable`.
    pub fn close(&self) {
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        let discarded = state.staged.len();
        *state = IndexState {
            closed: true,
            ..IndexState::default()
        };
        tracing::info!(discarded, "Tool index closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.read().closed {
            return Err(closed_error());
        }
        Ok(())
    }

    fn build_searchable(&self, committed: &BTreeMap<String, ToolRecord>) -> Arc<SearchableIndex> {
        Arc::new(SearchableIndex::build(
            committed.values().cloned().collect(),
            self.dimension(),
            &self.params,
        ))
    }
}

fn closed_error() -> AppError {
    AppError::IndexUnavailable("tool index has been closed".to_string())
}
