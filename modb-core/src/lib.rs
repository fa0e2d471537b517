//! MODB Core - Multi-tenant, file-backed key-value storage engine
//!
//! Each tenant owns a collection of named databases. A database holds keyed
//! records with free-text tags and typed secondary indexes, and can be
//! cleaned online to drop dead journal entries.
//!
//! # Architecture
//!
//! - **Journal**: per-manifest, CRC-framed append-only segments; the durable
//!   source of truth, replayed on open
//! - **RecordSet**: the in-memory view of live records with tag postings and
//!   the [`IndexManager`]
//! - **Database**: one isolated store guarded by a lifecycle status
//! - **Collection / TenantRegistry**: name-to-instance bindings per tenant
//! - **Compaction**: the clean protocol, staging a copy and swapping it in

pub mod compaction;
pub mod convert;
pub mod index;
pub mod journal;
pub mod query;
pub mod storage;
pub mod validate;

mod error;
mod types;

pub use compaction::CleanReport;
pub use convert::{IndexType, IndexValue};
pub use error::{ErrorKind, ModbError, Result};
pub use index::{IndexInfo, IndexManager};
pub use query::{Page, RecordQuery};
pub use storage::{
    Collection, CreateOptions, Database, DatabaseInfo, StorageConfig, Tenant, TenantRegistry,
};
pub use types::*;

/// MODB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Journal segment size (16MB)
    pub const SEGMENT_SIZE: usize = 16 * 1024 * 1024;

    /// Journal manifests per database
    pub const DEFAULT_MANIFESTS: usize = 4;

    /// Upper bound on manifests per database
    pub const MAX_MANIFESTS: usize = 64;

    /// Values at least this large are lz4 compressed in the journal (4KB)
    pub const COMPRESS_THRESHOLD: usize = 4 * 1024;

    /// Page size when a caller does not ask for one
    pub const DEFAULT_PAGE_SIZE: usize = 10;
}
