//! Durable storage for category indexes and record bookkeeping.
//!
//! Layout under the index root:
//! - `indexes/<category>.vec`: one binary vector blob per category
//! - `records.json`: every record row, serialized as one document
//! - `metadata.json`: model/dimension sidecar for compatibility checks
//!
//! Every write lands in a temporary file in the destination directory and is
//! atomically renamed over the live file, so a crash mid-write leaves the
//! previous state intact. Missing files are a valid cold start; a damaged
//! blob is logged and treated as empty, to be regenerated by a rebuild.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::category::Category;
use crate::error::{SyncError, SyncResult};
use crate::store::{VectorRecord, get_utc_timestamp};
use crate::vector::FlatIndex;

/// Current metadata sidecar format version.
const METADATA_VERSION: u32 = 1;

/// Paths and blob I/O for one index root directory.
#[derive(Debug, Clone)]
pub struct IndexStorage {
    root: PathBuf,
}

impl IndexStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the index root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root and indexes directories if they are missing.
    pub fn ensure_layout(&self) -> SyncResult<()> {
        let dir = self.indexes_dir();
        std::fs::create_dir_all(&dir).map_err(|e| SyncError::Persistence {
            path: dir,
            source: Box::new(e),
        })
    }

    fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    /// Path of one category's index blob.
    #[must_use]
    pub fn index_path(&self, category: Category) -> PathBuf {
        self.indexes_dir().join(format!("{category}.vec"))
    }

    /// Path of the record store document.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.root.join("records.json")
    }

    /// Path of the metadata sidecar.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Persists one category's index blob.
    pub fn save_index(&self, category: Category, index: &FlatIndex) -> SyncResult<()> {
        let path = self.index_path(category);
        write_atomic(&path, &index.to_bytes()).map_err(|e| SyncError::Persistence {
            path,
            source: Box::new(e),
        })
    }

    /// Loads one category's index blob.
    ///
    /// Returns `Ok(None)` when the file does not exist (cold start) or when
    /// the blob fails validation. Callers treat `None` as an empty index;
    /// records pointing into a discarded blob are pruned at load.
    pub fn load_index(&self, category: Category) -> SyncResult<Option<FlatIndex>> {
        let path = self.index_path(category);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).map_err(|e| SyncError::Load {
            path: path.clone(),
            source: Box::new(e),
        })?;

        let len = file
            .metadata()
            .map_err(|e| SyncError::Load {
                path: path.clone(),
                source: Box::new(e),
            })?
            .len();
        if len == 0 {
            // A zero-length file cannot be mapped and carries no data anyway.
            warn!(
                path = %path.display(),
                "Discarding empty index blob for '{category}'; \
                 run 'capdex rebuild {category} --source <file>' to restore it"
            );
            return Ok(None);
        }

        // SAFETY: the mapping is read-only and dropped before returning.
        // The live file is never modified in place, only replaced by rename.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SyncError::Load {
            path: path.clone(),
            source: Box::new(e),
        })?;

        match FlatIndex::from_bytes(&mmap) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Discarding unreadable index blob for '{category}'; \
                     run 'capdex rebuild {category} --source <file>' to restore it"
                );
                Ok(None)
            }
        }
    }

    /// Persists the whole record store.
    pub fn save_records(&self, records: &[VectorRecord]) -> SyncResult<()> {
        let path = self.records_path();
        let json = serde_json::to_vec_pretty(records).map_err(|e| SyncError::Persistence {
            path: path.clone(),
            source: Box::new(e),
        })?;
        write_atomic(&path, &json).map_err(|e| SyncError::Persistence {
            path,
            source: Box::new(e),
        })
    }

    /// Loads the whole record store.
    ///
    /// A missing file is an empty store. An unparseable file is logged and
    /// treated as empty so the process can start and be repopulated with
    /// per-category rebuilds.
    pub fn load_records(&self) -> SyncResult<Vec<VectorRecord>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let json = std::fs::read(&path).map_err(|e| SyncError::Load {
            path: path.clone(),
            source: Box::new(e),
        })?;

        match serde_json::from_slice(&json) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Discarding unparseable record store; \
                     run 'capdex rebuild <category> --source <file>' per category to repopulate"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Persists the metadata sidecar.
    pub fn save_metadata(&self, metadata: &IndexMetadata) -> SyncResult<()> {
        let path = self.metadata_path();
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| SyncError::Persistence {
            path: path.clone(),
            source: Box::new(e),
        })?;
        write_atomic(&path, &json).map_err(|e| SyncError::Persistence {
            path,
            source: Box::new(e),
        })
    }

    /// Loads the metadata sidecar.
    ///
    /// The sidecar is advisory; an absent, unparseable, or newer-versioned
    /// file yields `None` and is rewritten on the next persist.
    pub fn load_metadata(&self) -> SyncResult<Option<IndexMetadata>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path).map_err(|e| SyncError::Load {
            path: path.clone(),
            source: Box::new(e),
        })?;

        let metadata: IndexMetadata = match serde_json::from_str(&json) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unparseable metadata sidecar"
                );
                return Ok(None);
            }
        };

        if metadata.version > METADATA_VERSION {
            warn!(
                path = %path.display(),
                found = metadata.version,
                supported = METADATA_VERSION,
                "Ignoring metadata sidecar written by a newer format version"
            );
            return Ok(None);
        }

        Ok(Some(metadata))
    }
}

/// Writes `bytes` to a temporary file beside `path`, then renames it over
/// `path`. The temporary file lives in the destination directory so the
/// rename never crosses filesystems.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("destination path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Sidecar describing what produced the stored vectors.
///
/// Checked at load: a dimension change makes every stored vector unusable,
/// a model change silently degrades similarity until the next rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Embedding model that produced the stored vectors
    pub model: String,

    /// Dimension of every stored vector
    pub dimension: usize,

    /// Vector count per category index, keyed by category name
    pub vector_counts: BTreeMap<String, usize>,

    /// Total record rows across all categories
    pub record_count: usize,

    /// Unix timestamp when the sidecar was first written
    pub created_at: u64,

    /// Unix timestamp of the last persist
    pub updated_at: u64,

    /// Version of the sidecar format
    pub version: u32,
}

impl IndexMetadata {
    /// Creates a fresh sidecar with current timestamps.
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        let now = get_utc_timestamp();
        Self {
            model: model.into(),
            dimension,
            vector_counts: BTreeMap::new(),
            record_count: 0,
            created_at: now,
            updated_at: now,
            version: METADATA_VERSION,
        }
    }

    /// Refreshes the counts and bumps the update timestamp.
    pub fn update(&mut self, vector_counts: BTreeMap<String, usize>, record_count: usize) {
        self.vector_counts = vector_counts;
        self.record_count = record_count;
        self.updated_at = get_utc_timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorDimension;
    use tempfile::TempDir;

    fn axis(dimension: usize, index: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[index] = 1.0;
        v
    }

    fn record(category: Category, object_id: &str, position: u32) -> VectorRecord {
        VectorRecord {
            category,
            object_id: object_id.to_string(),
            index_position: crate::vector::IndexPosition::new(position),
            text: format!("text for {object_id}"),
            model_version: "test-model".to_string(),
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_index_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        let dimension = VectorDimension::new(4).unwrap();
        let mut index = FlatIndex::new(dimension);
        index.add(&axis(4, 0)).unwrap();
        index.add(&axis(4, 2)).unwrap();

        storage.save_index(Category::Capability, &index).unwrap();

        let loaded = storage.load_index(Category::Capability).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimension(), dimension);

        // Nearest neighbor of the second stored vector is itself
        let hits = loaded.search(&axis(4, 2), 1).unwrap();
        assert_eq!(hits[0].0.get(), 1);
    }

    #[test]
    fn test_missing_index_is_cold_start() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        assert!(storage.load_index(Category::Goal).unwrap().is_none());
    }

    #[test]
    fn test_damaged_index_blob_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        let path = storage.index_path(Category::Goal);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"definitely not a vector blob").unwrap();

        assert!(storage.load_index(Category::Goal).unwrap().is_none());
    }

    #[test]
    fn test_blob_with_overflowing_counts_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        // Valid magic and version but a count/dimension pair far past
        // what the payload holds. Loading must fall back to an empty
        // index instead of panicking in the codec.
        let mut blob = Vec::new();
        blob.extend_from_slice(b"CPDX");
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        blob.extend_from_slice(&0x8000_0000u32.to_le_bytes());

        let path = storage.index_path(Category::Goal);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &blob).unwrap();

        assert!(storage.load_index(Category::Goal).unwrap().is_none());
    }

    #[test]
    fn test_zero_length_blob_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        let path = storage.index_path(Category::Recommendation);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();

        assert!(storage.load_index(Category::Recommendation).unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous_blob() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());
        let dimension = VectorDimension::new(4).unwrap();

        let mut first = FlatIndex::new(dimension);
        first.add(&axis(4, 0)).unwrap();
        storage.save_index(Category::Capability, &first).unwrap();

        let mut second = FlatIndex::new(dimension);
        second.add(&axis(4, 0)).unwrap();
        second.add(&axis(4, 1)).unwrap();
        second.add(&axis(4, 2)).unwrap();
        storage.save_index(Category::Capability, &second).unwrap();

        let loaded = storage.load_index(Category::Capability).unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn test_records_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        let records = vec![
            record(Category::Capability, "cap-1", 0),
            record(Category::Goal, "goal-7", 0),
        ];
        storage.save_records(&records).unwrap();

        let loaded = storage.load_records().unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_missing_records_file_is_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        assert!(storage.load_records().unwrap().is_empty());
    }

    #[test]
    fn test_damaged_records_file_is_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        std::fs::create_dir_all(storage.root()).unwrap();
        std::fs::write(storage.records_path(), "{ not json").unwrap();

        assert!(storage.load_records().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());

        let mut metadata = IndexMetadata::new("text-embedding-004", 768);
        metadata.update(
            BTreeMap::from([("capability".to_string(), 12)]),
            10,
        );
        storage.save_metadata(&metadata).unwrap();

        let loaded = storage.load_metadata().unwrap().unwrap();
        assert_eq!(loaded.model, "text-embedding-004");
        assert_eq!(loaded.dimension, 768);
        assert_eq!(loaded.vector_counts.get("capability"), Some(&12));
        assert_eq!(loaded.record_count, 10);
        assert_eq!(loaded.version, METADATA_VERSION);
    }

    #[test]
    fn test_metadata_from_newer_version_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let storage = IndexStorage::new(temp_dir.path());
        std::fs::create_dir_all(storage.root()).unwrap();

        let future = r#"{
            "model": "future-model",
            "dimension": 1024,
            "vector_counts": {},
            "record_count": 0,
            "created_at": 1735689600,
            "updated_at": 1735689600,
            "version": 999
        }"#;
        std::fs::write(storage.metadata_path(), future).unwrap();

        assert!(storage.load_metadata().unwrap().is_none());
    }
}
