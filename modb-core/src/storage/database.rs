//! Database - manages a single database instance

use super::{RecordSet, StorageConfig};
use crate::convert::IndexType;
use crate::index::IndexInfo;
use crate::journal::{JournalConfig, JournalEntry, JournalReader, JournalWriter};
use crate::query::{paginate, Page, RecordQuery};
use crate::validate::{validate_database_name, validate_key, validate_manifests};
use crate::{
    now_millis, Comparator, DbStatus, ModbError, PagedList, Record, Result, SetRequest, Timestamp,
};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const META_FILE: &str = "meta.json";
const MANIFESTS_DIR: &str = "manifests";

/// Persisted database metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DatabaseMeta {
    pub name: String,
    pub manifests: usize,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexType>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_clean: Option<Timestamp>,
}

impl DatabaseMeta {
    pub fn new(name: &str, manifests: usize) -> Self {
        Self {
            name: name.to_string(),
            manifests,
            indexes: BTreeMap::new(),
            created_at: now_millis(),
            last_clean: None,
        }
    }

    fn load(dir: &Path) -> Result<Self> {
        let data = fs::read(dir.join(META_FILE))?;
        serde_json::from_slice(&data)
            .map_err(|e| ModbError::InvalidFormat(format!("{}: {}", META_FILE, e)))
    }

    /// Write through a temp file so a crash never leaves half a file
    fn store(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| ModbError::Internal(format!("encode {}: {}", META_FILE, e)))?;
        let tmp = dir.join(format!("{}.tmp", META_FILE));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, dir.join(META_FILE))?;
        Ok(())
    }
}

/// Point-in-time description of a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub status: DbStatus,
    /// Bytes on disk across all journal segments
    pub size_bytes: u64,
    pub manifests: usize,
    pub segments: usize,
    pub records: usize,
    pub tags: usize,
    pub indexes: Vec<IndexInfo>,
    pub created_at: Timestamp,
    pub last_clean: Option<Timestamp>,
}

/// A single MODB database
///
/// Every operation holds the status read lock for its whole duration and
/// fails with [`ModbError::NotReady`] unless the status is READY. Status
/// transitions take the write lock, so they wait for in-flight operations
/// and no operation starts while a transition is pending.
pub struct Database {
    name: String,
    dir: PathBuf,
    status: RwLock<DbStatus>,
    meta: Mutex<DatabaseMeta>,
    state: RwLock<RecordSet>,
    journals: Vec<JournalWriter>,
    journal_config: JournalConfig,
    compress_threshold: usize,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Database {
    /// Create a new, empty database at `dir`
    pub fn create(
        name: &str,
        dir: impl Into<PathBuf>,
        manifests: usize,
        config: &StorageConfig,
    ) -> Result<Self> {
        validate_database_name(name)?;
        validate_manifests(manifests)?;
        Self::create_with_meta(dir.into(), DatabaseMeta::new(name, manifests), config)
    }

    pub(crate) fn create_with_meta(
        dir: PathBuf,
        meta: DatabaseMeta,
        config: &StorageConfig,
    ) -> Result<Self> {
        if dir.exists() {
            return Err(ModbError::AlreadyExists(meta.name));
        }

        let mut db = Self::unopened(dir, meta, config, DbStatus::Creating);
        match db.initialize() {
            Ok(()) => {
                *db.status.get_mut() = DbStatus::Ready;
                info!(database = %db.name, manifests = db.journals.len(), "Created database");
                Ok(db)
            }
            Err(e) => {
                *db.status.get_mut() = DbStatus::Error;
                error!(database = %db.name, error = %e, "Database creation failed");
                if let Err(cleanup) = fs::remove_dir_all(&db.dir) {
                    warn!(database = %db.name, error = %cleanup, "Failed to remove partial database");
                }
                Err(e)
            }
        }
    }

    /// Open an existing database, replaying its journals
    pub fn open(dir: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self> {
        let dir = dir.into();
        let meta = DatabaseMeta::load(&dir)?;
        validate_database_name(&meta.name)?;
        validate_manifests(meta.manifests)?;

        let mut db = Self::unopened(dir, meta, config, DbStatus::Creating);
        let mut replayed = 0;
        {
            let state = db.state.get_mut();
            for manifest in 0..db.meta.get_mut().manifests {
                let journal_config = db
                    .journal_config
                    .for_dir(manifest_dir(&db.dir, manifest));
                for entry in JournalReader::new(journal_config).replay()? {
                    state.apply(entry)?;
                    replayed += 1;
                }
            }
        }
        db.open_journals()?;
        *db.status.get_mut() = DbStatus::Ready;

        info!(
            database = %db.name,
            entries = replayed,
            records = db.state.get_mut().len(),
            "Loaded database"
        );
        Ok(db)
    }

    /// Placeholder for a directory that failed to load
    ///
    /// It stays in ERROR so operators can describe and delete it.
    pub(crate) fn unavailable(name: &str, dir: PathBuf, config: &StorageConfig) -> Self {
        let meta = DatabaseMeta::load(&dir).unwrap_or_else(|_| DatabaseMeta::new(name, 0));
        let meta = DatabaseMeta {
            name: name.to_string(),
            ..meta
        };
        Self::unopened(dir, meta, config, DbStatus::Error)
    }

    fn unopened(dir: PathBuf, meta: DatabaseMeta, config: &StorageConfig, status: DbStatus) -> Self {
        Self {
            name: meta.name.clone(),
            dir,
            status: RwLock::new(status),
            state: RwLock::new(RecordSet::with_schema(meta.indexes.clone())),
            meta: Mutex::new(meta),
            journals: Vec::new(),
            journal_config: config.journal.clone(),
            compress_threshold: config.compress_threshold,
        }
    }

    fn initialize(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.meta.get_mut().store(&self.dir)?;
        self.open_journals()
    }

    fn open_journals(&mut self) -> Result<()> {
        let manifests = self.meta.get_mut().manifests;
        for manifest in 0..manifests {
            let config = self.journal_config.for_dir(manifest_dir(&self.dir, manifest));
            self.journals.push(JournalWriter::new(config)?);
        }
        Ok(())
    }

    /// Get database name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current lifecycle status
    pub fn status(&self) -> DbStatus {
        *self.status.read()
    }

    pub fn last_clean(&self) -> Option<Timestamp> {
        self.meta.lock().last_clean
    }

    /// Hold the status gate open for the duration of one operation
    fn ready(&self) -> Result<RwLockReadGuard<'_, DbStatus>> {
        let status = self.status.read();
        if *status != DbStatus::Ready {
            return Err(ModbError::NotReady {
                name: self.name.clone(),
                status: *status,
            });
        }
        Ok(status)
    }

    fn journal_for(&self, key: &str) -> &JournalWriter {
        let manifest = crc32fast::hash(key.as_bytes()) as usize % self.journals.len();
        &self.journals[manifest]
    }

    /// Insert or replace a record
    ///
    /// The journal entry is written before the in-memory state changes; a
    /// failed append leaves the previous version visible.
    pub fn set(&self, request: SetRequest) -> Result<()> {
        let _ready = self.ready()?;
        let mut state = self.state.write();

        let record = state.prepare(request)?;
        let declared = !state.indexes().undeclared(&record.indexes).is_empty();

        let entry = JournalEntry::put(&record, self.compress_threshold)?;
        self.journal_for(&record.key).append(&entry)?;
        debug!(database = %self.name, key = %record.key, "Set record");
        state.put(record)?;

        // The write is committed; replay rebuilds the schema if this fails
        if declared {
            let mut meta = self.meta.lock();
            meta.indexes = state.indexes().schema().clone();
            if let Err(e) = meta.store(&self.dir) {
                warn!(database = %self.name, error = %e, "Failed to persist index schema");
            }
        }
        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(self.get_record(key)?.value)
    }

    /// Get a full record by key
    pub fn get_record(&self, key: &str) -> Result<Record> {
        let _ready = self.ready()?;
        validate_key(key)?;
        self.state
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ModbError::KeyNotFound(key.to_string()))
    }

    /// Values of records matching `query`, in key order
    pub fn get_values(&self, query: &RecordQuery, page: Page) -> Result<PagedList<String>> {
        let _ready = self.ready()?;
        query.validate()?;
        let state = self.state.read();
        Ok(paginate(state.select(query), page).map(|r| r.value.clone()))
    }

    /// Keys of records matching `query`, in key order
    pub fn get_keys(&self, query: &RecordQuery, page: Page) -> Result<PagedList<String>> {
        let _ready = self.ready()?;
        query.validate()?;
        let state = self.state.read();
        Ok(paginate(state.select(query), page).map(|r| r.key.clone()))
    }

    /// Distinct tags, optionally those containing `text`
    pub fn get_tags(&self, text: Option<&str>, page: Page) -> Result<PagedList<String>> {
        let _ready = self.ready()?;
        let state = self.state.read();
        Ok(paginate(state.tags(text), page).map(Clone::clone))
    }

    /// Delete a record
    pub fn delete(&self, key: &str) -> Result<()> {
        let _ready = self.ready()?;
        validate_key(key)?;
        let mut state = self.state.write();

        if !state.contains(key) {
            return Err(ModbError::KeyNotFound(key.to_string()));
        }
        self.journal_for(key).append(&JournalEntry::delete(key))?;
        state.remove(key);
        debug!(database = %self.name, key = %key, "Deleted record");
        Ok(())
    }

    /// Check whether a key exists
    ///
    /// Keys that could never have been stored report `false`.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let _ready = self.ready()?;
        if validate_key(key).is_err() {
            return Ok(false);
        }
        Ok(self.state.read().contains(key))
    }

    /// Keys whose index value satisfies the comparator
    pub fn filter_keys(
        &self,
        index: &str,
        comparator: Comparator,
        value: &str,
        page: Page,
    ) -> Result<PagedList<String>> {
        let _ready = self.ready()?;
        let keys = self.state.read().indexes().filter(index, comparator, value)?;
        Ok(paginate(keys, page))
    }

    /// Values of records whose index value satisfies the comparator
    pub fn filter_values(
        &self,
        index: &str,
        comparator: Comparator,
        value: &str,
        page: Page,
    ) -> Result<PagedList<String>> {
        let _ready = self.ready()?;
        let state = self.state.read();
        let keys = state.indexes().filter(index, comparator, value)?;
        let values = keys
            .iter()
            .filter_map(|key| state.get(key))
            .map(|record| record.value.clone());
        Ok(paginate(values, page))
    }

    pub fn count(&self, index: &str, comparator: Comparator, value: &str) -> Result<usize> {
        let _ready = self.ready()?;
        self.state.read().indexes().count(index, comparator, value)
    }

    pub fn any(&self, index: &str, comparator: Comparator, value: &str) -> Result<bool> {
        let _ready = self.ready()?;
        self.state.read().indexes().any(index, comparator, value)
    }

    /// Describe the database in any status
    pub fn describe(&self) -> Result<DatabaseInfo> {
        let status = self.status();
        let (segments, size_bytes) = self.storage_stats()?;
        let meta = self.meta.lock().clone();
        let state = self.state.read();

        Ok(DatabaseInfo {
            name: self.name.clone(),
            status,
            size_bytes,
            manifests: meta.manifests,
            segments,
            records: state.len(),
            tags: state.tag_count(),
            indexes: state.indexes().infos(),
            created_at: meta.created_at,
            last_clean: meta.last_clean,
        })
    }

    /// Force all journals to disk
    pub fn sync(&self) -> Result<()> {
        for journal in &self.journals {
            journal.sync()?;
        }
        Ok(())
    }

    /// Segment count and bytes across all manifests
    pub(crate) fn storage_stats(&self) -> Result<(usize, u64)> {
        let mut segments = 0;
        let mut bytes = 0;
        for manifest in 0..self.journals.len() {
            let reader =
                JournalReader::new(self.journal_config.for_dir(manifest_dir(&self.dir, manifest)));
            segments += reader.segment_count()?;
            bytes += reader.size_bytes()?;
        }
        Ok((segments, bytes))
    }

    pub(crate) fn meta(&self) -> DatabaseMeta {
        let mut meta = self.meta.lock().clone();
        meta.indexes = self.state.read().indexes().schema().clone();
        meta
    }

    /// Move READY to CLEANING, waiting for in-flight operations
    pub(crate) fn begin_clean(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status != DbStatus::Ready {
            return Err(ModbError::NotReady {
                name: self.name.clone(),
                status: *status,
            });
        }
        *status = DbStatus::Cleaning;
        Ok(())
    }

    /// Take the database out of service ahead of removal
    ///
    /// Handles still held elsewhere see it as ERROR from here on. Returns
    /// the status it replaced.
    pub(crate) fn retire(&self) -> Result<DbStatus> {
        let mut status = self.status.write();
        if *status == DbStatus::Cleaning {
            return Err(ModbError::NotReady {
                name: self.name.clone(),
                status: *status,
            });
        }
        Ok(std::mem::replace(&mut *status, DbStatus::Error))
    }

    pub(crate) fn set_status(&self, status: DbStatus) {
        *self.status.write() = status;
    }

    /// Visit every live record in key order, ignoring the status gate
    pub(crate) fn export(&self, mut visit: impl FnMut(&Record) -> Result<()>) -> Result<usize> {
        let state = self.state.read();
        for record in state.iter() {
            visit(record)?;
        }
        Ok(state.len())
    }

    /// Append an already validated record
    pub(crate) fn import(&self, record: Record) -> Result<()> {
        let mut state = self.state.write();
        let entry = JournalEntry::put(&record, self.compress_threshold)?;
        self.journal_for(&record.key).append(&entry)?;
        state.put(record)
    }
}

fn manifest_dir(dir: &Path, manifest: usize) -> PathBuf {
    dir.join(MANIFESTS_DIR).join(format!("{:04}", manifest))
}
