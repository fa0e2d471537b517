//! Journal reader for replay

use super::{list_segments, JournalConfig, JournalEntry};
use crate::{ModbError, Result};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Reads every entry of a journal directory in append order
pub struct JournalReader {
    config: JournalConfig,
}

impl JournalReader {
    /// Create a new journal reader
    pub fn new(config: JournalConfig) -> Self {
        Self { config }
    }

    /// Replay all entries from all segments
    ///
    /// A corrupt or torn tail is cut off the segment so that later appends
    /// are not hidden behind it.
    pub fn replay(&self) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();

        for segment_path in list_segments(&self.config.dir)? {
            let segment_entries = self.read_segment(&segment_path)?;
            debug!(
                "Replayed {} entries from {:?}",
                segment_entries.len(),
                segment_path.file_name()
            );
            entries.extend(segment_entries);
        }

        Ok(entries)
    }

    /// Number of segment files
    pub fn segment_count(&self) -> Result<usize> {
        Ok(list_segments(&self.config.dir)?.len())
    }

    /// Total bytes across segment files
    pub fn size_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for path in list_segments(&self.config.dir)? {
            total += std::fs::metadata(path)?.len();
        }
        Ok(total)
    }

    fn read_segment(&self, path: &Path) -> Result<Vec<JournalEntry>> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match JournalEntry::deserialize_with_checksum(&data[offset..]) {
                Ok((entry, bytes_read)) => {
                    entries.push(entry);
                    offset += bytes_read;
                }
                Err(ModbError::ChecksumMismatch { .. }) | Err(ModbError::Corruption(_)) => {
                    // Corrupted entry, skip rest of segment
                    warn!(
                        "Corrupt entry at offset {} in {:?}, truncating replay",
                        offset,
                        path.file_name()
                    );
                    break;
                }
                Err(ModbError::InvalidFormat(msg))
                    if msg == "Entry too short" || msg == "Incomplete entry" =>
                {
                    // Torn write at the tail
                    warn!(
                        "Incomplete entry at offset {} in {:?}, truncating replay",
                        offset,
                        path.file_name()
                    );
                    break;
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }

        if offset < data.len() {
            OpenOptions::new()
                .write(true)
                .open(path)?
                .set_len(offset as u64)?;
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalEntryType, JournalWriter, SyncPolicy};
    use std::io::Write;
    use tempfile::TempDir;

    fn config(dir: &Path) -> JournalConfig {
        JournalConfig {
            dir: dir.to_path_buf(),
            sync_policy: SyncPolicy::Immediate,
            segment_size: 64,
        }
    }

    #[test]
    fn test_journal_replay() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());

        {
            let writer = JournalWriter::new(config.clone()).unwrap();
            for i in 0..10 {
                writer
                    .append(&JournalEntry::delete(&format!("key-{}", i)))
                    .unwrap();
            }
            writer.sync().unwrap();
        }

        let reader = JournalReader::new(config);
        let entries = reader.replay().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].key, "key-0");
        assert_eq!(entries[9].key, "key-9");
        assert!(entries.iter().all(|e| e.entry_type == JournalEntryType::Delete));
        assert!(reader.segment_count().unwrap() > 1);
        assert!(reader.size_bytes().unwrap() > 0);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());

        {
            let writer = JournalWriter::new(config.clone()).unwrap();
            writer.append(&JournalEntry::delete("a")).unwrap();
        }

        let segment = list_segments(temp_dir.path()).unwrap().pop().unwrap();
        let clean_len = std::fs::metadata(&segment).unwrap().len();
        let mut file = std::fs::OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let entries = JournalReader::new(config.clone()).replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "a");
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), clean_len);

        // Appends after the repaired tail are visible again
        JournalWriter::new(config.clone())
            .unwrap()
            .append(&JournalEntry::delete("b"))
            .unwrap();
        assert_eq!(JournalReader::new(config).replay().unwrap().len(), 2);
    }
}
