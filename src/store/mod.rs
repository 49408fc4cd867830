//! Durable bookkeeping for indexed vectors.
//!
//! The record store is the single source of truth for what an index
//! position means. Each record links one external object to the position
//! of its vector inside the object's category index, together with the
//! embedded text and the model that produced the vector.
//!
//! Records are owned per category by a [`RecordTable`], which keeps two
//! maps in lockstep: object id to record, and position to owning object.
//! The index itself never deletes, so a table can reference fewer
//! positions than the index holds; the reverse (a record pointing past
//! the index) is repaired at load time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::category::Category;
use crate::vector::IndexPosition;

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Bookkeeping row linking a source object to its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Category whose index holds the vector.
    pub category: Category,
    /// Opaque caller-provided identifier of the source entity.
    pub object_id: String,
    /// Position of the vector in the category index at insertion time.
    pub index_position: IndexPosition,
    /// The embedded text, truncated for storage.
    pub text: String,
    /// Embedding model that produced the vector.
    pub model_version: String,
    /// UTC seconds when the record was first created.
    pub created_at: u64,
    /// UTC seconds of the last upsert.
    pub updated_at: u64,
}

/// Per-category record map enforcing the uniqueness invariants.
///
/// At most one record per object id, and at most one record resolvable
/// per index position. Superseded records keep their row until removed
/// but lose their position claim, which is what keeps orphaned vectors
/// out of search results.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    by_object: HashMap<String, VectorRecord>,
    by_position: HashMap<IndexPosition, String>,
}

impl RecordTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    /// Returns true if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }

    /// Inserts or replaces the record for `object_id`.
    ///
    /// On replace, `created_at` is preserved from the prior record, the
    /// prior position claim is released, and the new position is claimed.
    /// The prior vector stays in the index; it just becomes unresolvable.
    pub fn upsert(
        &mut self,
        category: Category,
        object_id: &str,
        position: IndexPosition,
        text: String,
        model_version: &str,
        now: u64,
    ) {
        let created_at = match self.by_object.get(object_id) {
            Some(prior) => {
                if self
                    .by_position
                    .get(&prior.index_position)
                    .is_some_and(|owner| owner == object_id)
                {
                    self.by_position.remove(&prior.index_position);
                }
                prior.created_at
            }
            None => now,
        };

        self.by_position.insert(position, object_id.to_string());
        self.by_object.insert(
            object_id.to_string(),
            VectorRecord {
                category,
                object_id: object_id.to_string(),
                index_position: position,
                text,
                model_version: model_version.to_string(),
                created_at,
                updated_at: now,
            },
        );
    }

    /// Looks up a record by object id.
    #[must_use]
    pub fn get(&self, object_id: &str) -> Option<&VectorRecord> {
        self.by_object.get(object_id)
    }

    /// Resolves a search hit back to its record.
    ///
    /// Absence is a normal outcome: the position may belong to a removed
    /// or superseded record (an orphaned vector).
    #[must_use]
    pub fn get_by_position(&self, position: IndexPosition) -> Option<&VectorRecord> {
        self.by_position
            .get(&position)
            .and_then(|object_id| self.by_object.get(object_id))
    }

    /// Deletes the record for `object_id` if present.
    ///
    /// Returns whether anything was deleted. Never touches the index: the
    /// vector stays behind as an orphan until the next rebuild.
    pub fn remove(&mut self, object_id: &str) -> bool {
        match self.by_object.remove(object_id) {
            Some(record) => {
                if self
                    .by_position
                    .get(&record.index_position)
                    .is_some_and(|owner| owner == object_id)
                {
                    self.by_position.remove(&record.index_position);
                }
                true
            }
            None => false,
        }
    }

    /// Iterates over all records in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &VectorRecord> {
        self.by_object.values()
    }

    /// Returns all records sorted by object id for deterministic output.
    #[must_use]
    pub fn sorted_records(&self) -> Vec<VectorRecord> {
        let mut records: Vec<VectorRecord> = self.by_object.values().cloned().collect();
        records.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        records
    }

    /// UTC seconds of the most recently updated record, if any.
    #[must_use]
    pub fn latest_updated_at(&self) -> Option<u64> {
        self.by_object.values().map(|r| r.updated_at).max()
    }

    /// Inserts a persisted row, resolving duplicates.
    ///
    /// Duplicate object ids keep the most recently updated row. When two
    /// objects claim the same position, the claim goes to the most
    /// recently updated one; the loser keeps its row but is no longer
    /// resolvable by position.
    pub fn insert_loaded(&mut self, record: VectorRecord) {
        if let Some(existing) = self.by_object.get(&record.object_id) {
            if existing.updated_at >= record.updated_at {
                return;
            }
            let old_position = existing.index_position;
            if self
                .by_position
                .get(&old_position)
                .is_some_and(|owner| owner == &record.object_id)
            {
                self.by_position.remove(&old_position);
            }
        }

        let claims_position = match self.by_position.get(&record.index_position) {
            Some(owner) => self
                .by_object
                .get(owner)
                .is_none_or(|current| record.updated_at >= current.updated_at),
            None => true,
        };
        if claims_position {
            self.by_position
                .insert(record.index_position, record.object_id.clone());
        }
        self.by_object.insert(record.object_id.clone(), record);
    }

    /// Drops records whose position lies at or beyond `index_len`.
    ///
    /// Such records can only come from a crash between persisting the
    /// records file and the index blob; dropping them restores the
    /// invariant that every record resolves inside the index. Returns the
    /// object ids that were dropped.
    pub fn prune_beyond(&mut self, index_len: usize) -> Vec<String> {
        let stale: Vec<String> = self
            .by_object
            .values()
            .filter(|r| r.index_position.as_usize() >= index_len)
            .map(|r| r.object_id.clone())
            .collect();
        for object_id in &stale {
            self.remove(object_id);
        }
        stale
    }
}
