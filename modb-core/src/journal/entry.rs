//! Journal entry types and serialization

use crate::convert::IndexValue;
use crate::{ModbError, Record, Result, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Journal entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JournalEntryType {
    /// Upsert a record
    Put = 1,
    /// Remove a record
    Delete = 2,
}

impl TryFrom<u8> for JournalEntryType {
    type Error = ModbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(JournalEntryType::Put),
            2 => Ok(JournalEntryType::Delete),
            _ => Err(ModbError::InvalidFormat(format!(
                "Invalid journal entry type: {}",
                value
            ))),
        }
    }
}

/// Record body as persisted in a `Put` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: Vec<u8>,
    /// `value` is lz4 compressed with a size prefix
    pub compressed: bool,
    pub tags: Vec<String>,
    pub indexes: Vec<(String, IndexValue)>,
    pub timestamp: Timestamp,
}

impl StoredRecord {
    /// Build the persisted form, compressing values of at least `compress_threshold` bytes
    pub fn from_record(record: &Record, compress_threshold: usize) -> Self {
        let raw = record.value.as_bytes();
        let (value, compressed) = if compress_threshold > 0 && raw.len() >= compress_threshold {
            (lz4_flex::compress_prepend_size(raw), true)
        } else {
            (raw.to_vec(), false)
        };

        Self {
            value,
            compressed,
            tags: record.tags.iter().cloned().collect(),
            indexes: record
                .indexes
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            timestamp: record.timestamp,
        }
    }

    /// Rebuild the record for `key`
    pub fn into_record(self, key: String) -> Result<Record> {
        let bytes = if self.compressed {
            lz4_flex::decompress_size_prepended(&self.value)
                .map_err(|e| ModbError::Corruption(format!("record {}: {}", key, e)))?
        } else {
            self.value
        };
        let value = String::from_utf8(bytes)
            .map_err(|e| ModbError::Corruption(format!("record {}: {}", key, e)))?;

        Ok(Record {
            key,
            value,
            tags: self.tags.into_iter().collect(),
            indexes: self.indexes.into_iter().collect(),
            timestamp: self.timestamp,
        })
    }
}

/// A single journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Entry type
    pub entry_type: JournalEntryType,
    /// Record key
    pub key: String,
    /// Entry payload (serialized)
    pub payload: Vec<u8>,
}

impl JournalEntry {
    /// Create a put entry for a record
    pub fn put(record: &Record, compress_threshold: usize) -> Result<Self> {
        let stored = StoredRecord::from_record(record, compress_threshold);
        let payload = bincode::serialize(&stored)
            .map_err(|e| ModbError::InvalidFormat(e.to_string()))?;
        Ok(Self {
            entry_type: JournalEntryType::Put,
            key: record.key.clone(),
            payload,
        })
    }

    /// Create a delete entry
    pub fn delete(key: &str) -> Self {
        Self {
            entry_type: JournalEntryType::Delete,
            key: key.to_string(),
            payload: vec![],
        }
    }

    /// Serialize the entry with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry type
    /// - 4 bytes: key length
    /// - N bytes: key
    /// - 4 bytes: payload length
    /// - N bytes: payload
    /// - 4 bytes: CRC32 checksum
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(17 + self.key.len() + self.payload.len());

        // Reserve space for length prefix
        buf.put_u32_le(0);

        buf.put_u8(self.entry_type as u8);

        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(self.key.as_bytes());

        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        // Checksum excludes the length prefix
        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        buf.freeze()
    }

    /// Deserialize entry from bytes, validating checksum
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(ModbError::InvalidFormat("Entry too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);

        let len = cursor.get_u32_le() as usize;
        // type + key length + payload length + checksum
        if len < 13 {
            return Err(ModbError::Corruption(format!("Entry length {} too small", len)));
        }
        if data.len() < 4 + len {
            return Err(ModbError::InvalidFormat("Incomplete entry".into()));
        }

        let entry_data = &data[4..4 + len];

        let expected_checksum = {
            let mut c = std::io::Cursor::new(&entry_data[entry_data.len() - 4..]);
            c.get_u32_le()
        };
        let actual_checksum = crc32fast::hash(&entry_data[..entry_data.len() - 4]);

        if expected_checksum != actual_checksum {
            return Err(ModbError::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let body = &entry_data[..entry_data.len() - 4];
        let mut cursor = std::io::Cursor::new(body);

        let entry_type = JournalEntryType::try_from(cursor.get_u8())?;

        let key_len = cursor.get_u32_le() as usize;
        let pos = cursor.position() as usize;
        if pos + key_len + 4 > body.len() {
            return Err(ModbError::Corruption("Key length exceeds entry".into()));
        }
        let key = String::from_utf8(body[pos..pos + key_len].to_vec())
            .map_err(|e| ModbError::InvalidFormat(e.to_string()))?;
        cursor.set_position((pos + key_len) as u64);

        let payload_len = cursor.get_u32_le() as usize;
        let pos = cursor.position() as usize;
        if pos + payload_len > body.len() {
            return Err(ModbError::Corruption("Payload length exceeds entry".into()));
        }
        let payload = body[pos..pos + payload_len].to_vec();

        let entry = JournalEntry {
            entry_type,
            key,
            payload,
        };

        Ok((entry, 4 + len))
    }

    /// Get the record from a put entry
    pub fn get_record(&self) -> Result<Record> {
        if self.entry_type != JournalEntryType::Put {
            return Err(ModbError::InvalidFormat("Not a put entry".into()));
        }
        let stored: StoredRecord = bincode::deserialize(&self.payload)
            .map_err(|e| ModbError::InvalidFormat(e.to_string()))?;
        stored.into_record(self.key.clone())
    }
}
