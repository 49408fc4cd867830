//! Durability across process lifetimes: reopen, cold start, crash
//! repair, and configuration drift.

use std::sync::Arc;

use capdex::config::EmbeddingConfig;
use capdex::{Category, Settings, SyncError, VectorSyncManager, create_generator};
use tempfile::TempDir;

fn hashed_settings(dir: &TempDir, dimension: usize) -> Settings {
    Settings {
        index_path: dir.path().join("index"),
        embedding: EmbeddingConfig {
            provider: "hashed".to_string(),
            dimension,
            ..EmbeddingConfig::default()
        },
        ..Settings::default()
    }
}

fn open_manager(dir: &TempDir, dimension: usize) -> Result<VectorSyncManager, SyncError> {
    let settings = Arc::new(hashed_settings(dir, dimension));
    let generator = create_generator(&settings).expect("create generator");
    VectorSyncManager::open(settings, generator)
}

fn capability_stats(manager: &VectorSyncManager) -> (usize, usize) {
    let report = manager.stats();
    let stats = report
        .categories
        .iter()
        .find(|stats| stats.category == Category::Capability)
        .expect("capability stats");
    (stats.vectors, stats.records)
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
        manager
            .add_or_update(Category::Goal, "g1", "improve customer retention")
            .expect("add g1");
    }

    let manager = open_manager(&dir, 64).expect("reopen");
    let hits = manager
        .search(Category::Capability, "Customer Onboarding", 5, 0.9)
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object_id, "c1");
    assert!(hits[0].score.get() > 0.999);

    let report = manager.stats();
    assert_eq!(report.dimension, 64);
    let goal = report
        .categories
        .iter()
        .find(|stats| stats.category == Category::Goal)
        .expect("goal stats");
    assert_eq!(goal.vectors, 1);
    assert_eq!(goal.records, 1);
}

#[test]
fn test_missing_files_are_a_cold_start() {
    let dir = TempDir::new().expect("create temp dir");
    let manager = open_manager(&dir, 64).expect("open empty root");

    for stats in &manager.stats().categories {
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.records, 0);
        assert_eq!(stats.latest_age_secs, None);
    }
    assert!(dir.path().join("index/indexes").is_dir());
}

#[test]
fn test_records_past_index_are_pruned_on_load() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
    }

    // Forge a record claiming a position the index blob never received,
    // which is what a crash between the two writes would leave if the
    // write order were reversed.
    let records_path = dir.path().join("index/records.json");
    let raw = std::fs::read_to_string(&records_path).expect("read records");
    let records: serde_json::Value = serde_json::from_str(&raw).expect("parse records");
    let mut tampered = records.as_array().cloned().expect("records array");
    let mut ghost = tampered[0].clone();
    ghost["object_id"] = "ghost".into();
    ghost["index_position"] = 9.into();
    tampered.push(ghost);
    std::fs::write(
        &records_path,
        serde_json::to_vec_pretty(&tampered).expect("serialize records"),
    )
    .expect("write records");

    let manager = open_manager(&dir, 64).expect("reopen");
    assert_eq!(capability_stats(&manager), (1, 1));

    let hits = manager
        .search(Category::Capability, "Customer Onboarding", 5, 0.5)
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object_id, "c1");
}

#[test]
fn test_corrupt_blob_recovers_as_empty_index() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
    }

    std::fs::write(
        dir.path().join("index/indexes/capability.vec"),
        b"not an index",
    )
    .expect("corrupt blob");

    // Damage is not fatal; the category comes back empty and its record,
    // now pointing past the empty index, is dropped with it.
    let manager = open_manager(&dir, 64).expect("reopen despite damage");
    assert_eq!(capability_stats(&manager), (0, 0));
}

#[test]
fn test_corrupt_records_recover_via_rebuild() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
    }

    std::fs::write(dir.path().join("index/records.json"), b"{ not json").expect("corrupt records");

    // The blob survives but nothing resolves its vectors anymore.
    let manager = open_manager(&dir, 64).expect("reopen despite damage");
    assert_eq!(capability_stats(&manager), (1, 0));
    let hits = manager
        .search(Category::Capability, "Customer Onboarding", 5, -1.0)
        .expect("search");
    assert!(hits.is_empty());

    // Rebuild from source restores full service.
    let count = manager
        .rebuild(
            Category::Capability,
            vec![("c1".to_string(), "Customer Onboarding".to_string())],
        )
        .expect("rebuild");
    assert_eq!(count, 1);
    assert_eq!(capability_stats(&manager), (1, 1));

    let hits = manager
        .search(Category::Capability, "Customer Onboarding", 5, 0.9)
        .expect("search after rebuild");
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_dimension_change_is_rejected_at_open() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
    }

    let err = open_manager(&dir, 32).expect_err("dimension change must be rejected");
    assert!(matches!(err, SyncError::Config { .. }));

    // Restoring the original dimension opens cleanly again.
    let manager = open_manager(&dir, 64).expect("reopen with original dimension");
    assert_eq!(manager.stats().dimension, 64);
    assert_eq!(capability_stats(&manager), (1, 1));
}

#[test]
fn test_model_change_is_tolerated() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let manager = open_manager(&dir, 64).expect("open");
        manager
            .add_or_update(Category::Capability, "c1", "Customer Onboarding")
            .expect("add c1");
    }

    // A different model at the same dimension is degraded but usable, so
    // opening must succeed and keep serving the stored vectors.
    let metadata_path = dir.path().join("index/metadata.json");
    let raw = std::fs::read_to_string(&metadata_path).expect("read metadata");
    let mut metadata: serde_json::Value = serde_json::from_str(&raw).expect("parse metadata");
    metadata["model"] = "text-embedding-legacy".into();
    std::fs::write(
        &metadata_path,
        serde_json::to_vec_pretty(&metadata).expect("serialize metadata"),
    )
    .expect("write metadata");

    let manager = open_manager(&dir, 64).expect("reopen after model change");
    assert_eq!(capability_stats(&manager), (1, 1));
}

#[test]
fn test_atomic_writes_leave_no_stray_files() {
    let dir = TempDir::new().expect("create temp dir");
    let manager = open_manager(&dir, 64).expect("open");

    manager
        .add_or_update(Category::Capability, "c1", "Customer Onboarding")
        .expect("add c1");
    manager
        .add_or_update(Category::Capability, "c1", "Digital Onboarding")
        .expect("update c1");
    manager
        .add_or_update(Category::Goal, "g1", "improve retention")
        .expect("add g1");
    manager.remove(Category::Goal, "g1").expect("remove g1");

    let names: Vec<String> = std::fs::read_dir(dir.path().join("index"))
        .expect("read index root")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    for name in &names {
        assert!(
            name == "indexes" || name == "records.json" || name == "metadata.json",
            "unexpected file in index root: {name}"
        );
    }
}
