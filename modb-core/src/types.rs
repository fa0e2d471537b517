//! Core types for MODB

use crate::convert::IndexValue;
use crate::{ModbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`]
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle status of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbStatus {
    Creating,
    Ready,
    Cleaning,
    Error,
}

impl DbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbStatus::Creating => "CREATING",
            DbStatus::Ready => "READY",
            DbStatus::Cleaning => "CLEANING",
            DbStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for DbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index filter comparators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Comparator {
    /// Whether the comparator needs an ordered value type
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Comparator::Equal | Comparator::NotEqual)
    }
}

impl FromStr for Comparator {
    type Err = ModbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" | "equal" | "=" | "==" => Ok(Comparator::Equal),
            "ne" | "notequal" | "!=" | "<>" => Ok(Comparator::NotEqual),
            "gt" | "greaterthan" | ">" => Ok(Comparator::GreaterThan),
            "ge" | "gte" | "greaterorequal" | ">=" => Ok(Comparator::GreaterOrEqual),
            "lt" | "lessthan" | "<" => Ok(Comparator::LessThan),
            "le" | "lte" | "lessorequal" | "<=" => Ok(Comparator::LessOrEqual),
            other => Err(ModbError::validation(
                "comparator",
                format!("unknown comparator {other}"),
            )),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Equal => "Equal",
            Comparator::NotEqual => "NotEqual",
            Comparator::GreaterThan => "GreaterThan",
            Comparator::GreaterOrEqual => "GreaterOrEqual",
            Comparator::LessThan => "LessThan",
            Comparator::LessOrEqual => "LessOrEqual",
        };
        f.write_str(s)
    }
}

/// Untyped index entry as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index name
    pub name: String,
    /// Textual value, converted with the index type
    pub value: String,
    /// Declared type name (e.g. "integer")
    #[serde(rename = "type")]
    pub type_name: String,
}

impl IndexEntry {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_name: type_name.into(),
        }
    }
}

/// An upsert request for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexEntry>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl SetRequest {
    /// Create a request with no tags or index entries
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            tags: Vec::new(),
            indexes: Vec::new(),
            timestamp: None,
        }
    }

    /// Attach a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attach an index entry
    pub fn with_index(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.indexes.push(IndexEntry::new(name, value, type_name));
        self
    }

    /// Set an explicit timestamp
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub tags: BTreeSet<String>,
    pub indexes: BTreeMap<String, IndexValue>,
    pub timestamp: Timestamp,
}

impl Record {
    /// Approximate in-memory size in bytes
    pub fn size(&self) -> usize {
        self.key.len()
            + self.value.len()
            + self.tags.iter().map(|t| t.len()).sum::<usize>()
            + self.indexes.keys().map(|k| k.len() + 16).sum::<usize>()
            + 8
    }
}

/// Optional inclusive time bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        Self { from, to }
    }

    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
    }
}

/// One page of an ordered result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> PagedList<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transform the items while keeping the paging metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedList<U> {
        PagedList {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}
