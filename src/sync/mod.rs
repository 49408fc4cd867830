//! Orchestration layer keeping indexes, records, and disk in step.
//!
//! [`VectorSyncManager`] owns the full lifecycle: it loads persisted state
//! at construction, serializes writers, and persists after every mutation.
//! Readers never block behind writers or disk I/O: the live state is an
//! immutable snapshot behind an `Arc`, and a mutation builds a successor
//! snapshot, persists it, and only then swaps the pointer. A failed persist
//! leaves both memory and disk at the prior state.
//!
//! The append-only index cannot delete, so `remove` deletes only the
//! record. The orphaned vector keeps scoring in nearest-neighbor results
//! and is filtered out when its position no longer resolves to a record.
//! `rebuild` is the one operation that reclaims that space.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::Settings;
use crate::embedding::{EmbeddingGenerator, random_unit_vector};
use crate::error::{SyncError, SyncResult};
use crate::storage::{IndexMetadata, IndexStorage};
use crate::store::{RecordTable, get_utc_timestamp};
use crate::vector::{FlatIndex, IndexPosition, Score, VectorDimension};

/// Characters of source text carried in failure logs.
const LOG_TEXT_CHARS: usize = 80;

/// One search result, resolved back to its source object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Caller-provided identifier of the matching object.
    pub object_id: String,
    /// Cosine similarity between query and stored text.
    pub score: Score,
    /// The stored (truncated) text that was embedded.
    pub text: String,
}

/// Diagnostic counters for one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: Category,
    /// Vectors in the index, orphans included.
    pub vectors: usize,
    /// Serialized byte size of the index blob.
    pub index_bytes: usize,
    /// Live records; at most `vectors`, less after removes.
    pub records: usize,
    /// Seconds since the most recent record update, if any records exist.
    pub latest_age_secs: Option<u64>,
}

/// Read-only view over the whole subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub model: String,
    pub dimension: usize,
    pub categories: Vec<CategoryStats>,
}

/// Index and records of one category, immutable once published.
#[derive(Debug)]
struct CategoryState {
    index: FlatIndex,
    records: RecordTable,
}

/// Consistent view over all categories, shared with readers via `Arc`.
#[derive(Debug, Clone)]
struct Snapshot {
    categories: [Arc<CategoryState>; 3],
}

impl Snapshot {
    fn category(&self, category: Category) -> &Arc<CategoryState> {
        &self.categories[category.ordinal()]
    }

    /// Builds a successor snapshot with one category replaced.
    fn with_category(&self, category: Category, state: Arc<CategoryState>) -> Self {
        let mut categories = self.categories.clone();
        categories[category.ordinal()] = state;
        Self { categories }
    }
}

/// Coordinates embedding, indexing, bookkeeping, and persistence.
///
/// Explicitly constructed with [`VectorSyncManager::open`] and dropped by
/// its owner; every mutation persists before it becomes visible, so there
/// is no separate flush or shutdown step.
///
/// The vector dimension is taken from the injected generator, which is the
/// component that actually produces vectors of that dimension.
pub struct VectorSyncManager {
    settings: Arc<Settings>,
    generator: Arc<dyn EmbeddingGenerator>,
    storage: IndexStorage,
    dimension: VectorDimension,
    /// Sidecar state carried across persists so `created_at` survives.
    metadata: Mutex<IndexMetadata>,
    /// Serializes mutations for the whole embed-append-upsert-persist
    /// sequence; position assignment depends on the index size staying
    /// fixed between read and append.
    write_lock: Mutex<()>,
    /// Live state; replaced atomically, only after a successful persist.
    snapshot: RwLock<Arc<Snapshot>>,
}

impl VectorSyncManager {
    /// Loads persisted state and returns a ready manager.
    ///
    /// Missing files are a cold start. A stored dimension that disagrees
    /// with the generator's is an error: every stored vector would be
    /// unusable, so the caller must either restore the old model settings
    /// or start a fresh index root. A model name change is only logged,
    /// since old vectors still work, just with degraded similarity until
    /// each category is rebuilt.
    pub fn open(
        settings: Arc<Settings>,
        generator: Arc<dyn EmbeddingGenerator>,
    ) -> SyncResult<Self> {
        let dimension = generator.dimension();
        let storage = IndexStorage::new(&settings.index_path);
        storage.ensure_layout()?;

        let metadata = match storage.load_metadata()? {
            Some(existing) => {
                if existing.dimension != dimension.get() {
                    return Err(SyncError::Config {
                        reason: format!(
                            "stored index has dimension {} but the configured model produces {}; \
                             restore embedding.dimension or point index_path at a fresh \
                             directory, then rebuild each category",
                            existing.dimension,
                            dimension.get()
                        ),
                    });
                }
                if existing.model != generator.model_version() {
                    warn!(
                        stored = %existing.model,
                        configured = %generator.model_version(),
                        "Embedding model changed since the index was written; \
                         rebuild each category to restore similarity quality"
                    );
                }
                existing
            }
            None => IndexMetadata::new(generator.model_version(), dimension.get()),
        };

        let mut tables = [RecordTable::new(), RecordTable::new(), RecordTable::new()];
        for record in storage.load_records()? {
            tables[record.category.ordinal()].insert_loaded(record);
        }
        let [capability, goal, recommendation] = tables;

        let categories = [
            Arc::new(Self::load_category(
                &storage,
                Category::Capability,
                dimension,
                capability,
            )?),
            Arc::new(Self::load_category(
                &storage,
                Category::Goal,
                dimension,
                goal,
            )?),
            Arc::new(Self::load_category(
                &storage,
                Category::Recommendation,
                dimension,
                recommendation,
            )?),
        ];

        Ok(Self {
            settings,
            generator,
            storage,
            dimension,
            metadata: Mutex::new(metadata),
            write_lock: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(Snapshot { categories })),
        })
    }

    /// Loads one category, repairing whatever a crash could have left.
    fn load_category(
        storage: &IndexStorage,
        category: Category,
        dimension: VectorDimension,
        mut records: RecordTable,
    ) -> SyncResult<CategoryState> {
        let index = match storage.load_index(category)? {
            Some(index) if index.dimension() == dimension => index,
            Some(index) => {
                warn!(
                    category = %category,
                    stored = index.dimension().get(),
                    configured = dimension.get(),
                    "Discarding index blob with mismatched dimension; \
                     rebuild the category to restore it"
                );
                FlatIndex::new(dimension)
            }
            None => FlatIndex::new(dimension),
        };

        // The blob is written before the records file, so a record past the
        // index means the records write landed without its blob. Drop them.
        let dropped = records.prune_beyond(index.len());
        if !dropped.is_empty() {
            warn!(
                category = %category,
                dropped = dropped.len(),
                "Dropped records referencing positions beyond the stored index"
            );
        }

        Ok(CategoryState { index, records })
    }

    /// Embeds `text` and indexes it under `(category, object_id)`.
    ///
    /// Returns the appended vector's position. Calling this twice for the
    /// same object leaves two vectors in the index but only one live
    /// record pointing at the latest position; the older vector stays
    /// behind as an orphan until the next rebuild.
    pub fn add_or_update(
        &self,
        category: Category,
        object_id: &str,
        text: &str,
    ) -> SyncResult<IndexPosition> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidInput {
                reason: format!("cannot index empty text for object '{object_id}'"),
            });
        }

        let _writer = self.write_lock.lock();

        let vector = self.embed_or_fallback(trimmed, category, Some(object_id))?;

        let current = self.current_snapshot();
        let state = current.category(category);
        let mut index = state.index.clone();
        let mut records = state.records.clone();

        let position = index.add(&vector)?;
        records.upsert(
            category,
            object_id,
            position,
            truncate_chars(trimmed, self.settings.max_stored_text).to_string(),
            self.generator.model_version(),
            get_utc_timestamp(),
        );

        self.commit(&current, category, CategoryState { index, records }, true)?;

        debug!(
            category = %category,
            object_id,
            position = position.get(),
            "Indexed text"
        );
        Ok(position)
    }

    /// Finds up to `k` objects whose stored text is most similar to
    /// `query_text`.
    ///
    /// Hits scoring strictly below `threshold` are dropped; an exactly
    /// equal score passes. Positions that no longer resolve to a record
    /// (removed or superseded objects) are skipped silently, so the result
    /// may hold fewer than `k` entries even when the index does not.
    /// Results come in descending score order, ties broken by insertion
    /// order.
    pub fn search(
        &self,
        category: Category,
        query_text: &str,
        k: usize,
        threshold: f32,
    ) -> SyncResult<Vec<SearchHit>> {
        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidInput {
                reason: "query text is empty".to_string(),
            });
        }
        if k == 0 {
            return Err(SyncError::InvalidInput {
                reason: "result count k must be positive".to_string(),
            });
        }
        // NaN compares false against every score, which would disable the
        // threshold filter instead of applying it.
        if !threshold.is_finite() {
            return Err(SyncError::InvalidInput {
                reason: format!("threshold must be a finite number, got {threshold}"),
            });
        }

        let vector = self.embed_or_fallback(trimmed, category, None)?;

        let state = {
            let snapshot = self.snapshot.read();
            Arc::clone(snapshot.category(category))
        };

        let mut hits = Vec::new();
        for (position, score) in state.index.search(&vector, k)? {
            if score.get() < threshold {
                continue;
            }
            if let Some(record) = state.records.get_by_position(position) {
                hits.push(SearchHit {
                    object_id: record.object_id.clone(),
                    score,
                    text: record.text.clone(),
                });
            }
        }
        Ok(hits)
    }

    /// Deletes the record for `(category, object_id)`.
    ///
    /// The vector stays in the index and keeps competing in
    /// nearest-neighbor scoring until the next rebuild; only the skip in
    /// [`Self::search`] keeps it out of results. Returns `Ok(false)`
    /// without touching disk when no record exists.
    pub fn remove(&self, category: Category, object_id: &str) -> SyncResult<bool> {
        let _writer = self.write_lock.lock();

        let current = self.current_snapshot();
        let state = current.category(category);
        if state.records.get(object_id).is_none() {
            return Ok(false);
        }

        let mut records = state.records.clone();
        records.remove(object_id);
        let index = state.index.clone();

        self.commit(&current, category, CategoryState { index, records }, false)?;

        debug!(
            category = %category,
            object_id,
            "Removed record; its vector stays in the index until rebuild"
        );
        Ok(true)
    }

    /// Regenerates one category from an authoritative enumeration.
    ///
    /// Builds a fresh index and record set off to the side, persists them,
    /// and swaps them in; readers keep seeing the old generation until the
    /// swap, so there is no empty-index window. Any entry that fails to
    /// validate or embed aborts the whole rebuild with the old state
    /// untouched. This is the only way to shed orphaned vectors.
    pub fn rebuild<I>(&self, category: Category, entries: I) -> SyncResult<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let _writer = self.write_lock.lock();

        let mut index = FlatIndex::new(self.dimension);
        let mut records = RecordTable::new();
        let mut count = 0usize;

        for (object_id, text) in entries {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(SyncError::InvalidInput {
                    reason: format!("rebuild entry '{object_id}' has empty text"),
                });
            }
            let vector = self.embed_or_fallback(trimmed, category, Some(&object_id))?;
            let position = index.add(&vector)?;
            records.upsert(
                category,
                &object_id,
                position,
                truncate_chars(trimmed, self.settings.max_stored_text).to_string(),
                self.generator.model_version(),
                get_utc_timestamp(),
            );
            count += 1;
        }

        let current = self.current_snapshot();
        self.commit(&current, category, CategoryState { index, records }, true)?;

        info!(category = %category, count, "Rebuilt index from source enumeration");
        Ok(count)
    }

    /// Point-in-time counters for every category.
    pub fn stats(&self) -> StatsReport {
        let snapshot = self.current_snapshot();
        let now = get_utc_timestamp();

        let categories = Category::ALL
            .iter()
            .map(|&category| {
                let state = snapshot.category(category);
                CategoryStats {
                    category,
                    vectors: state.index.len(),
                    index_bytes: state.index.byte_size(),
                    records: state.records.len(),
                    latest_age_secs: state
                        .records
                        .latest_updated_at()
                        .map(|at| now.saturating_sub(at)),
                }
            })
            .collect();

        StatsReport {
            model: self.generator.model_version().to_string(),
            dimension: self.dimension.get(),
            categories,
        }
    }

    /// Returns the settings this manager was opened with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn current_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Single policy chokepoint for embedding failures.
    ///
    /// Failures always log category, object and truncated text. With
    /// `embedding.fallback_on_error` set, a normalized random vector is
    /// substituted instead of failing; anything indexed or matched through
    /// it is noise until re-added, which is why the substitution itself is
    /// logged at WARN.
    fn embed_or_fallback(
        &self,
        text: &str,
        category: Category,
        object_id: Option<&str>,
    ) -> SyncResult<Vec<f32>> {
        match self.generator.embed(text) {
            Ok(vector) => Ok(vector),
            Err(e) => {
                let subject = object_id.unwrap_or("<query>");
                let shown = truncate_chars(text, LOG_TEXT_CHARS);
                if self.settings.embedding.fallback_on_error {
                    warn!(
                        category = %category,
                        object_id = subject,
                        text = shown,
                        error = %e,
                        "Embedding failed; substituting a random unit vector"
                    );
                    Ok(random_unit_vector(self.dimension))
                } else {
                    warn!(
                        category = %category,
                        object_id = subject,
                        text = shown,
                        error = %e,
                        "Embedding failed"
                    );
                    Err(e.into())
                }
            }
        }
    }

    /// Persists the successor state, then publishes it to readers.
    ///
    /// Write order is blob before records: a crash in between leaves an
    /// orphaned vector tail, never a record pointing past the index, and
    /// `load_category` repairs exactly that direction. On any persist
    /// failure nothing is swapped, so memory stays at the pre-operation
    /// state instead of diverging from disk.
    fn commit(
        &self,
        current: &Snapshot,
        category: Category,
        next_state: CategoryState,
        index_dirty: bool,
    ) -> SyncResult<()> {
        if index_dirty {
            self.storage.save_index(category, &next_state.index)?;
        }

        let successor = current.with_category(category, Arc::new(next_state));

        let mut all_records = Vec::new();
        for cat in Category::ALL {
            all_records.extend(successor.category(cat).records.sorted_records());
        }
        self.storage.save_records(&all_records)?;

        let mut vector_counts = BTreeMap::new();
        for cat in Category::ALL {
            vector_counts.insert(cat.as_str().to_string(), successor.category(cat).index.len());
        }
        {
            let mut metadata = self.metadata.lock();
            let mut next_metadata = metadata.clone();
            next_metadata.update(vector_counts, all_records.len());
            self.storage.save_metadata(&next_metadata)?;
            *metadata = next_metadata;
        }

        *self.snapshot.write() = Arc::new(successor);
        Ok(())
    }
}

impl fmt::Debug for VectorSyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorSyncManager")
            .field("root", &self.storage.root())
            .field("model", &self.generator.model_version())
            .field("dimension", &self.dimension.get())
            .finish_non_exhaustive()
    }
}

/// Cuts `text` after at most `max_chars` characters, on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
