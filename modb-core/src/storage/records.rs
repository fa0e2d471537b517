//! In-memory record state for one database

use crate::convert::IndexType;
use crate::index::{IndexManager, TagIndex};
use crate::journal::{JournalEntry, JournalEntryType};
use crate::query::RecordQuery;
use crate::validate::{validate_key, validate_tag};
use crate::{now_millis, ModbError, Record, Result, SetRequest};
use std::collections::BTreeMap;

/// Live records plus their tag and index postings
///
/// Records, tags and indexes are only ever changed together through
/// [`RecordSet::put`] and [`RecordSet::remove`], so a reader holding the
/// set sees either all of a mutation or none of it.
#[derive(Debug, Default)]
pub struct RecordSet {
    records: BTreeMap<String, Record>,
    tags: TagIndex,
    indexes: IndexManager,
    live_bytes: usize,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a persisted index schema
    pub fn with_schema(schema: BTreeMap<String, IndexType>) -> Self {
        Self {
            indexes: IndexManager::with_schema(schema),
            ..Self::default()
        }
    }

    /// Validate a request and turn it into a record
    pub fn prepare(&self, request: SetRequest) -> Result<Record> {
        validate_key(&request.key)?;
        for tag in &request.tags {
            validate_tag(tag)?;
        }
        let indexes = self.indexes.resolve(&request.indexes)?;

        Ok(Record {
            key: request.key,
            value: request.value,
            tags: request.tags.into_iter().collect(),
            indexes,
            timestamp: request.timestamp.unwrap_or_else(now_millis),
        })
    }

    /// Insert or replace a record
    pub fn put(&mut self, record: Record) -> Result<()> {
        // A conflicting type fails before anything is touched
        for (name, value) in &record.indexes {
            if let Some(declared) = self.indexes.index_type(name) {
                if declared != value.index_type() {
                    return Err(ModbError::Corruption(format!(
                        "index {} is declared as {}, record {} holds {}",
                        name,
                        declared,
                        record.key,
                        value.index_type()
                    )));
                }
            }
        }

        self.remove(&record.key);
        self.indexes.insert(&record.key, &record.indexes)?;
        self.tags.insert(&record.key, &record.tags);
        self.live_bytes += record.size();
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    /// Remove a record with all of its tag and index entries
    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.tags.remove(key, &record.tags);
        self.indexes.remove(key, &record.indexes);
        self.live_bytes = self.live_bytes.saturating_sub(record.size());
        Some(record)
    }

    /// Apply a replayed journal entry
    pub fn apply(&mut self, entry: JournalEntry) -> Result<()> {
        match entry.entry_type {
            JournalEntryType::Put => {
                let record = entry.get_record()?;
                self.put(record)
            }
            JournalEntryType::Delete => {
                self.remove(&entry.key);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Approximate bytes held by live records
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// All records in key order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Records matching a tag and time query, in key order
    pub fn select(&self, query: &RecordQuery) -> Vec<&Record> {
        query.select(&self.records, &self.tags)
    }

    /// Distinct tags containing `text`, in tag order
    pub fn tags<'a>(&'a self, text: Option<&'a str>) -> impl Iterator<Item = &'a String> + 'a {
        self.tags.matching(text)
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }
}
