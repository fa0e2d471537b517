//! Collection - the databases of one tenant

use super::{Database, DatabaseInfo, StorageConfig};
use crate::compaction::{self, CleanReport};
use crate::validate::{validate_database_name, validate_manifests};
use crate::{DbStatus, ModbError, Result};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Options for [`Collection::create`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Journal manifests; the configured default when unset
    pub manifests: Option<usize>,
}

impl CreateOptions {
    pub fn with_manifests(manifests: usize) -> Self {
        Self {
            manifests: Some(manifests),
        }
    }
}

/// Named databases under one directory
///
/// Lookups only take the map's read lock. Creating, deleting and promoting
/// a cleaned database are serialized through a separate lifecycle lock so
/// that slow disk work never blocks lookups.
pub struct Collection {
    id: String,
    dir: PathBuf,
    config: StorageConfig,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    lifecycle: Mutex<()>,
}

impl Collection {
    /// Open a collection, loading every database under `dir`
    pub fn open(id: &str, dir: impl Into<PathBuf>, config: StorageConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        compaction::recover(&dir)?;

        let collection = Self {
            id: id.to_string(),
            dir,
            config,
            databases: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        };
        collection.load_databases()?;
        Ok(collection)
    }

    fn load_databases(&self) -> Result<()> {
        let mut databases = self.databases.write();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            // Staging and retired copies live in hidden directories
            if name.starts_with('.') {
                continue;
            }

            match Database::open(entry.path(), &self.config) {
                Ok(db) if db.name() == name => {
                    databases.insert(name, Arc::new(db));
                }
                Ok(db) => {
                    warn!(
                        collection = %self.id,
                        directory = %name,
                        database = %db.name(),
                        "Database name does not match its directory, skipping"
                    );
                }
                Err(e) => {
                    // Keep it visible to describe and delete as ERROR
                    error!(collection = %self.id, database = %name, error = %e, "Failed to load database");
                    if validate_database_name(&name).is_ok() {
                        let db = Database::unavailable(&name, entry.path(), &self.config);
                        databases.insert(name, Arc::new(db));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn database_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub(crate) fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock()
    }

    /// Create a new database; fails if the name is taken
    pub fn create(&self, name: &str, options: CreateOptions) -> Result<Arc<Database>> {
        validate_database_name(name)?;
        let manifests = options.manifests.unwrap_or(self.config.default_manifests);
        validate_manifests(manifests)?;

        let _lifecycle = self.lifecycle.lock();
        if self.databases.read().contains_key(name) {
            return Err(ModbError::AlreadyExists(name.to_string()));
        }
        self.create_locked(name, manifests)
    }

    fn create_locked(&self, name: &str, manifests: usize) -> Result<Arc<Database>> {
        let db = Arc::new(Database::create(
            name,
            self.database_dir(name),
            manifests,
            &self.config,
        )?);
        self.databases
            .write()
            .insert(name.to_string(), Arc::clone(&db));
        info!(collection = %self.id, database = %name, "Registered database");
        Ok(db)
    }

    /// Get a database by name
    pub fn get(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ModbError::DatabaseNotFound(name.to_string()))
    }

    /// Get a database, creating it first if allowed
    ///
    /// Concurrent callers racing on the same missing name all receive the
    /// one instance created by the first of them.
    pub fn get_or_create(&self, name: &str, create_if_missing: bool) -> Result<Arc<Database>> {
        if let Some(db) = self.databases.read().get(name) {
            return Ok(Arc::clone(db));
        }
        if !create_if_missing {
            return Err(ModbError::DatabaseNotFound(name.to_string()));
        }
        validate_database_name(name)?;

        let _lifecycle = self.lifecycle.lock();
        if let Some(db) = self.databases.read().get(name) {
            return Ok(Arc::clone(db));
        }
        self.create_locked(name, self.config.default_manifests)
    }

    /// Whether a database is registered under `name`
    pub fn exists(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Database names in sorted order
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.databases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.read().is_empty()
    }

    pub fn describe(&self, name: &str) -> Result<DatabaseInfo> {
        self.get(name)?.describe()
    }

    /// Remove a database and its storage
    pub fn delete(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let db = self.get(name)?;
        db.retire()?;

        self.databases.write().remove(name);
        fs::remove_dir_all(db.dir())?;
        info!(collection = %self.id, database = %name, "Dropped database");
        Ok(())
    }

    /// Rebuild a database's storage, see [`compaction::clean`]
    pub fn clean(&self, name: &str) -> Result<CleanReport> {
        compaction::clean(self, name)
    }

    /// Bind `name` to a new instance in one step
    pub(crate) fn replace(&self, name: &str, db: Arc<Database>) -> Option<Arc<Database>> {
        self.databases.write().insert(name.to_string(), db)
    }

    /// Take every database out of service and remove the collection's storage
    ///
    /// Fails with [`ModbError::NotReady`] if any database is being cleaned;
    /// databases already retired by then get their previous status back.
    pub(crate) fn destroy(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut databases = self.databases.write();

        let mut retired: Vec<(Arc<Database>, DbStatus)> = Vec::with_capacity(databases.len());
        for db in databases.values() {
            match db.retire() {
                Ok(previous) => retired.push((Arc::clone(db), previous)),
                Err(e) => {
                    for (db, previous) in retired {
                        db.set_status(previous);
                    }
                    return Err(e);
                }
            }
        }
        databases.clear();

        fs::remove_dir_all(&self.dir)?;
        info!(collection = %self.id, "Removed collection");
        Ok(())
    }
}
