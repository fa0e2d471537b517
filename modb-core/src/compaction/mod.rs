//! Clean: rebuild a database's storage without dead journal entries
//!
//! The live records of a database are copied into a fresh database under
//! `<collection>/.staging/<name>`. The copy is then promoted by two renames:
//! the live directory moves to `<collection>/.retired/<name>` and the staging
//! directory takes its place. The reopened copy replaces the old instance in
//! the collection, and the retired directory is removed.
//!
//! Until the second rename the original directory is authoritative. A crash
//! at any point is repaired by [`recover`] when the collection is next
//! opened.

use crate::journal::SyncPolicy;
use crate::storage::{Collection, Database, DatabaseMeta, StorageConfig};
use crate::{now_millis, DbStatus, ModbError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Directory for copies under construction
pub const STAGING_DIR: &str = ".staging";

/// Directory for originals being replaced
pub const RETIRED_DIR: &str = ".retired";

/// Outcome of a successful clean
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub name: String,
    pub records: usize,
    pub segments_before: usize,
    pub segments_after: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub elapsed_ms: u64,
}

/// Clean one database of `collection`
///
/// Fails with [`ModbError::NotReady`] unless the database is READY. On
/// failure the original instance is put back to READY with its data intact,
/// or left in ERROR if its directory could not be restored.
pub fn clean(collection: &Collection, name: &str) -> Result<CleanReport> {
    let db = collection.get(name)?;
    db.begin_clean()?;

    let started = Instant::now();
    info!(collection = %collection.id(), database = %name, "Clean started");

    let paths = CleanPaths::new(collection.dir(), name);
    let (segments_before, bytes_before) = match db.storage_stats() {
        Ok(stats) => stats,
        Err(e) => return Err(abort(&db, &paths, e)),
    };

    let records = match stage(collection, &db, &paths.staging) {
        Ok(records) => records,
        Err(e) => return Err(abort(&db, &paths, e)),
    };

    let promoted = promote(collection, &db, &paths)?;
    let (segments_after, bytes_after) = stats_after_swap(&promoted);

    let report = CleanReport {
        name: name.to_string(),
        records,
        segments_before,
        segments_after,
        bytes_before,
        bytes_after,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        collection = %collection.id(),
        database = %name,
        records = report.records,
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        elapsed_ms = report.elapsed_ms,
        "Clean finished"
    );
    Ok(report)
}

struct CleanPaths {
    live: PathBuf,
    staging: PathBuf,
    retired: PathBuf,
}

impl CleanPaths {
    fn new(collection_dir: &Path, name: &str) -> Self {
        Self {
            live: collection_dir.join(name),
            staging: collection_dir.join(STAGING_DIR).join(name),
            retired: collection_dir.join(RETIRED_DIR).join(name),
        }
    }
}

/// The swap already happened, so a stats failure only costs the report
fn stats_after_swap(promoted: &Database) -> (usize, u64) {
    promoted.storage_stats().unwrap_or_else(|e| {
        warn!(database = %promoted.name(), error = %e, "Failed to measure cleaned database");
        (0, 0)
    })
}

/// Staging writes skip per-record syncs; the copy is synced once before promotion
fn staging_config(config: &StorageConfig) -> StorageConfig {
    let mut config = config.clone();
    config.journal.sync_policy = SyncPolicy::None;
    config
}

/// Copy every live record into a new database at `staging`
fn stage(collection: &Collection, db: &Database, staging: &Path) -> Result<usize> {
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }

    let meta = DatabaseMeta {
        last_clean: Some(now_millis()),
        ..db.meta()
    };
    let copy = Database::create_with_meta(
        staging.to_path_buf(),
        meta,
        &staging_config(collection.config()),
    )?;
    let records = db.export(|record| copy.import(record.clone()))?;
    copy.sync()?;
    Ok(records)
}

/// Swap the staged copy in under the database's name
fn promote(collection: &Collection, db: &Arc<Database>, paths: &CleanPaths) -> Result<Arc<Database>> {
    let _lifecycle = collection.lock_lifecycle();

    if paths.retired.exists() {
        if let Err(e) = fs::remove_dir_all(&paths.retired) {
            return Err(abort(db, paths, e.into()));
        }
    }
    if let Some(parent) = paths.retired.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return Err(abort(db, paths, e.into()));
        }
    }
    if let Err(e) = fs::rename(&paths.live, &paths.retired) {
        return Err(abort(db, paths, e.into()));
    }

    if let Err(e) = fs::rename(&paths.staging, &paths.live) {
        return Err(restore(db, paths, e.into()));
    }

    let promoted = match Database::open(&paths.live, collection.config()) {
        Ok(promoted) => Arc::new(promoted),
        Err(e) => {
            // Put the staged copy back where it came from first
            if let Err(back) = fs::rename(&paths.live, &paths.staging) {
                return Err(fail(db, e, back.into()));
            }
            return Err(restore(db, paths, e));
        }
    };
    collection.replace(db.name(), Arc::clone(&promoted));

    // The old instance stays CLEANING; stale handles get a retryable error
    if let Err(e) = fs::remove_dir_all(&paths.retired) {
        warn!(database = %db.name(), error = %e, "Failed to remove retired copy");
    }
    Ok(promoted)
}

/// Back out before the live directory moved
fn abort(db: &Database, paths: &CleanPaths, cause: ModbError) -> ModbError {
    discard(&paths.staging);
    db.set_status(DbStatus::Ready);
    warn!(database = %db.name(), error = %cause, "Clean failed, database unchanged");
    cause
}

/// Move the original back into place after the live directory moved
fn restore(db: &Database, paths: &CleanPaths, cause: ModbError) -> ModbError {
    match fs::rename(&paths.retired, &paths.live) {
        Ok(()) => abort(db, paths, cause),
        Err(e) => fail(db, cause, e.into()),
    }
}

fn fail(db: &Database, cause: ModbError, restore_error: ModbError) -> ModbError {
    db.set_status(DbStatus::Error);
    error!(
        database = %db.name(),
        error = %cause,
        restore_error = %restore_error,
        "Clean failed and the original could not be restored"
    );
    cause
}

fn discard(staging: &Path) {
    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!(error = %e, "Failed to remove staging copy");
        }
    }
}

/// Repair a collection directory after an interrupted clean
///
/// A retired copy without a live one is moved back; a retired copy next to
/// a live one is a finished clean and is removed. Staging copies are never
/// authoritative and are always removed.
pub fn recover(collection_dir: &Path) -> Result<()> {
    let retired_root = collection_dir.join(RETIRED_DIR);
    if retired_root.exists() {
        for entry in fs::read_dir(&retired_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let live = collection_dir.join(&name);

            if live.exists() {
                warn!(database = %name, "Removing retired copy of a finished clean");
                fs::remove_dir_all(entry.path())?;
            } else {
                warn!(database = %name, "Restoring database from an interrupted clean");
                fs::rename(entry.path(), &live)?;
            }
        }
        fs::remove_dir_all(&retired_root)?;
    }

    let staging_root = collection_dir.join(STAGING_DIR);
    if staging_root.exists() {
        for entry in fs::read_dir(&staging_root)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            warn!(database = %name, "Removing staging copy of an interrupted clean");
        }
        fs::remove_dir_all(&staging_root)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Page, RecordQuery};
    use crate::storage::{CreateOptions, StorageConfig};
    use crate::{Comparator, SetRequest};
    use tempfile::TempDir;

    fn collection(dir: &Path) -> Collection {
        Collection::open("c1", dir.join("c1"), StorageConfig::new(dir)).unwrap()
    }

    fn fill(db: &Database) {
        for i in 0..50 {
            db.set(
                SetRequest::new(format!("k{:02}", i), format!("v{}", i))
                    .with_tag(if i % 2 == 0 { "even" } else { "odd" })
                    .with_index("n", i.to_string(), "integer"),
            )
            .unwrap();
        }
        // Overwrites and deletes leave dead entries behind
        for i in 0..50 {
            db.set(
                SetRequest::new(format!("k{:02}", i), format!("w{}", i))
                    .with_tag(if i % 2 == 0 { "even" } else { "odd" })
                    .with_index("n", i.to_string(), "integer"),
            )
            .unwrap();
        }
        for i in 40..50 {
            db.delete(&format!("k{:02}", i)).unwrap();
        }
    }

    #[test]
    fn test_clean_preserves_content() {
        let temp_dir = TempDir::new().unwrap();
        let collection = collection(temp_dir.path());
        let db = collection.create("data", CreateOptions::default()).unwrap();
        fill(&db);

        let keys_before = db.get_keys(&RecordQuery::new(), Page::all()).unwrap();
        let even_before = db
            .get_keys(&RecordQuery::new().with_tag("even"), Page::all())
            .unwrap();

        let report = collection.clean("data").unwrap();
        assert_eq!(report.records, 40);
        assert!(report.bytes_after < report.bytes_before);

        let cleaned = collection.get("data").unwrap();
        assert!(!Arc::ptr_eq(&db, &cleaned));
        assert_eq!(db.status(), DbStatus::Cleaning);
        assert_eq!(cleaned.status(), DbStatus::Ready);
        assert!(cleaned.last_clean().is_some());

        assert_eq!(cleaned.get_keys(&RecordQuery::new(), Page::all()).unwrap(), keys_before);
        assert_eq!(
            cleaned
                .get_keys(&RecordQuery::new().with_tag("even"), Page::all())
                .unwrap(),
            even_before
        );
        assert_eq!(cleaned.get("k07").unwrap(), "w7");
        assert_eq!(cleaned.count("n", Comparator::GreaterOrEqual, "30").unwrap(), 10);

        assert!(!temp_dir.path().join("c1").join(STAGING_DIR).join("data").exists());
        assert!(!temp_dir.path().join("c1").join(RETIRED_DIR).join("data").exists());
    }

    #[test]
    fn test_clean_requires_ready() {
        let temp_dir = TempDir::new().unwrap();
        let collection = collection(temp_dir.path());
        let db = collection.create("data", CreateOptions::default()).unwrap();

        db.begin_clean().unwrap();
        assert!(matches!(
            collection.clean("data"),
            Err(ModbError::NotReady {
                status: DbStatus::Cleaning,
                ..
            })
        ));
        assert!(matches!(
            collection.clean("missing"),
            Err(ModbError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn test_failed_stage_restores_ready() {
        let temp_dir = TempDir::new().unwrap();
        let collection = collection(temp_dir.path());
        let db = collection.create("data", CreateOptions::default()).unwrap();
        db.set(SetRequest::new("k", "v")).unwrap();

        // A plain file where the staging directory must go
        fs::write(temp_dir.path().join("c1").join(STAGING_DIR), b"blocked").unwrap();

        assert!(collection.clean("data").is_err());
        let same = collection.get("data").unwrap();
        assert!(Arc::ptr_eq(&db, &same));
        assert_eq!(same.status(), DbStatus::Ready);
        assert_eq!(same.get("k").unwrap(), "v");
    }

    #[test]
    fn test_recover_interrupted_clean() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("c1");
        {
            let collection = collection(temp_dir.path());
            let db = collection.create("data", CreateOptions::default()).unwrap();
            db.set(SetRequest::new("k", "v")).unwrap();
            collection.create("other", CreateOptions::default()).unwrap();
        }

        // Crash after the live directory moved aside
        fs::create_dir_all(root.join(RETIRED_DIR)).unwrap();
        fs::rename(root.join("data"), root.join(RETIRED_DIR).join("data")).unwrap();
        fs::create_dir_all(root.join(STAGING_DIR).join("data")).unwrap();
        // Crash after promotion, before the retired copy was removed
        fs::create_dir_all(root.join(RETIRED_DIR).join("other")).unwrap();

        let collection = collection(temp_dir.path());
        assert_eq!(collection.list(), vec!["data", "other"]);
        assert_eq!(collection.get("data").unwrap().get("k").unwrap(), "v");
        assert!(!root.join(RETIRED_DIR).exists());
        assert!(!root.join(STAGING_DIR).exists());
    }

    #[test]
    fn test_staging_skips_per_record_sync() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::new(temp_dir.path());
        assert_eq!(config.journal.sync_policy, SyncPolicy::Immediate);

        let staging = staging_config(&config);
        assert_eq!(staging.journal.sync_policy, SyncPolicy::None);
        assert_eq!(staging.journal.segment_size, config.journal.segment_size);
        assert_eq!(staging.compress_threshold, config.compress_threshold);
    }

    #[test]
    fn test_unmeasurable_swap_still_reports() {
        let temp_dir = TempDir::new().unwrap();
        let collection = collection(temp_dir.path());
        let db = collection
            .create("data", CreateOptions::with_manifests(1))
            .unwrap();
        db.set(SetRequest::new("k", "v")).unwrap();
        assert_ne!(stats_after_swap(&db), (0, 0));

        // A file where the manifest directory should be
        let manifest = temp_dir.path().join("c1").join("data").join("manifests").join("0000");
        fs::rename(&manifest, temp_dir.path().join("moved")).unwrap();
        fs::write(&manifest, b"not a directory").unwrap();
        assert!(db.storage_stats().is_err());
        assert_eq!(stats_after_swap(&db), (0, 0));
    }
}
