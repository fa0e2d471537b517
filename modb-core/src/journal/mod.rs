//! Segmented append-only journal
//!
//! Every database manifest owns one journal directory. Records are appended
//! as CRC-framed entries; the journal is replayed on open to rebuild the
//! in-memory record map and indexes. Overwritten and deleted records stay
//! in the segments until the database is cleaned.

mod entry;
mod reader;
mod writer;

pub use entry::{JournalEntry, JournalEntryType, StoredRecord};
pub use reader::JournalReader;
pub use writer::JournalWriter;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Journal sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    #[default]
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Sync on interval (trades durability for performance)
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

/// Journal configuration
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for segment files
    pub dir: PathBuf,
    /// Sync policy
    pub sync_policy: SyncPolicy,
    /// Maximum segment size in bytes
    pub segment_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/journal"),
            sync_policy: SyncPolicy::default(),
            segment_size: crate::config::SEGMENT_SIZE,
        }
    }
}

impl JournalConfig {
    /// Same settings, different directory
    pub fn for_dir(&self, dir: PathBuf) -> Self {
        Self {
            dir,
            ..self.clone()
        }
    }
}

pub(crate) fn segment_file_name(segment_id: u64) -> String {
    format!("seg_{:020}.log", segment_id)
}

pub(crate) fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("seg_"))
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

/// Segment files in a journal directory, oldest first
pub(crate) fn list_segments(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if parse_segment_id(&path).is_some() {
            segments.push(path);
        }
    }

    segments.sort_by_key(|p| parse_segment_id(p).unwrap_or(0));
    Ok(segments)
}
