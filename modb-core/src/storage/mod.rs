//! Storage - databases, collections and the tenant registry

mod collection;
mod database;
mod records;
mod registry;

pub use collection::{Collection, CreateOptions};
pub use database::{Database, DatabaseInfo};
pub(crate) use database::DatabaseMeta;
pub use records::RecordSet;
pub use registry::{Tenant, TenantRegistry};

use crate::journal::JournalConfig;
use crate::validate::validate_manifests;
use crate::{ModbError, Result};
use std::path::PathBuf;

/// Storage configuration shared by every collection
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Journal settings; the directory is set per manifest
    pub journal: JournalConfig,
    /// Manifests for databases created without an explicit count
    pub default_manifests: usize,
    /// Values of at least this many bytes are compressed in the journal (0 disables)
    pub compress_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal: JournalConfig::default(),
            default_manifests: crate::config::DEFAULT_MANIFESTS,
            compress_threshold: crate::config::COMPRESS_THRESHOLD,
        }
    }
}

impl StorageConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_manifests(self.default_manifests)?;
        if self.journal.segment_size == 0 {
            return Err(ModbError::validation(
                "segment_size",
                "segment size must be greater than zero",
            ));
        }
        Ok(())
    }
}
