//! Journal writer implementation

use super::{list_segments, parse_segment_id, segment_file_name, JournalConfig, JournalEntry, SyncPolicy};
use crate::{ModbError, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Appends entries to the newest segment of one journal directory
pub struct JournalWriter {
    config: JournalConfig,
    inner: Mutex<JournalWriterInner>,
}

struct JournalWriterInner {
    file: BufWriter<File>,
    segment_id: u64,
    bytes_written: usize,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl JournalWriter {
    /// Open the journal, continuing the latest segment
    pub fn new(config: JournalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let segment_id = Self::find_latest_segment(&config.dir)?;
        let file = Self::open_segment(&config.dir, segment_id)?;
        let bytes_written = file.metadata()?.len() as usize;

        let inner = JournalWriterInner {
            file: BufWriter::new(file),
            segment_id,
            bytes_written,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Append an entry to the journal
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let serialized = entry.serialize_with_checksum();
        let mut inner = self.inner.lock();

        if inner.bytes_written > 0
            && inner.bytes_written + serialized.len() > self.config.segment_size
        {
            self.rotate_segment(&mut inner)?;
        }

        inner.file.write_all(&serialized)?;
        inner.bytes_written += serialized.len();
        inner.writes_since_sync += 1;

        if self.should_sync(&inner) {
            inner.file.flush()?;
            inner.file.get_ref().sync_data()?;
            inner.writes_since_sync = 0;
            inner.last_sync = Instant::now();
        } else {
            // Keep the bytes out of the process buffer so readers of the
            // directory (size, clean) see them
            inner.file.flush()?;
        }

        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        inner.writes_since_sync = 0;
        inner.last_sync = Instant::now();
        Ok(())
    }

    /// Get current segment ID
    pub fn current_segment(&self) -> u64 {
        self.inner.lock().segment_id
    }

    fn should_sync(&self, inner: &JournalWriterInner) -> bool {
        match self.config.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => inner.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                inner.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }

    fn rotate_segment(&self, inner: &mut JournalWriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;

        inner.segment_id += 1;
        let file = Self::open_segment(&self.config.dir, inner.segment_id)?;
        inner.file = BufWriter::new(file);
        inner.bytes_written = 0;
        inner.writes_since_sync = 0;

        Ok(())
    }

    fn find_latest_segment(dir: &Path) -> Result<u64> {
        Ok(list_segments(dir)?
            .last()
            .and_then(|p| parse_segment_id(p))
            .unwrap_or(0))
    }

    fn open_segment(dir: &Path, segment_id: u64) -> Result<File> {
        let path = dir.join(segment_file_name(segment_id));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(ModbError::Io)
    }
}
