//! Secondary indexes
//!
//! Each index maps a typed value to the set of record keys holding it. The
//! type of an index is fixed by the first record that references it; later
//! records must supply values convertible to that type.

mod tags;

pub use tags::TagIndex;

use crate::convert::{IndexType, IndexValue};
use crate::validate::validate_index_name;
use crate::{Comparator, IndexEntry, ModbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Declared index name and type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

type Postings = BTreeMap<IndexValue, BTreeSet<String>>;

/// Per-database index manager
#[derive(Debug, Default)]
pub struct IndexManager {
    schema: BTreeMap<String, IndexType>,
    indexes: HashMap<String, Postings>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a persisted schema
    pub fn with_schema(schema: BTreeMap<String, IndexType>) -> Self {
        Self {
            schema,
            indexes: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &BTreeMap<String, IndexType> {
        &self.schema
    }

    pub fn index_type(&self, name: &str) -> Option<IndexType> {
        self.schema.get(name).copied()
    }

    /// Declared indexes in name order
    pub fn infos(&self) -> Vec<IndexInfo> {
        self.schema
            .iter()
            .map(|(name, ty)| IndexInfo {
                name: name.clone(),
                index_type: *ty,
            })
            .collect()
    }

    /// Convert caller entries into typed values
    ///
    /// Fails if a name is repeated, a type name is unknown, a type disagrees
    /// with the declared type, or a value does not convert.
    pub fn resolve(&self, entries: &[IndexEntry]) -> Result<BTreeMap<String, IndexValue>> {
        let mut resolved = BTreeMap::new();

        for entry in entries {
            validate_index_name(&entry.name)?;
            let requested: IndexType = entry.type_name.parse()?;

            if let Some(declared) = self.index_type(&entry.name) {
                if declared != requested {
                    return Err(ModbError::validation(
                        "indexes",
                        format!(
                            "index {} is declared as {}, got {}",
                            entry.name, declared, requested
                        ),
                    ));
                }
            }

            let value = requested.parse_value(&entry.value)?;
            if resolved.insert(entry.name.clone(), value).is_some() {
                return Err(ModbError::validation(
                    "indexes",
                    format!("index {} supplied more than once", entry.name),
                ));
            }
        }

        Ok(resolved)
    }

    /// Index names in `values` that are not yet declared
    pub fn undeclared(&self, values: &BTreeMap<String, IndexValue>) -> Vec<IndexInfo> {
        values
            .iter()
            .filter(|(name, _)| !self.schema.contains_key(*name))
            .map(|(name, value)| IndexInfo {
                name: name.clone(),
                index_type: value.index_type(),
            })
            .collect()
    }

    /// Add `key` under each value, declaring new indexes as needed
    pub fn insert(&mut self, key: &str, values: &BTreeMap<String, IndexValue>) -> Result<()> {
        for (name, value) in values {
            match self.schema.get(name) {
                Some(declared) if *declared != value.index_type() => {
                    return Err(ModbError::Corruption(format!(
                        "index {} is declared as {}, record {} holds {}",
                        name,
                        declared,
                        key,
                        value.index_type()
                    )));
                }
                Some(_) => {}
                None => {
                    self.schema.insert(name.clone(), value.index_type());
                }
            }
        }

        for (name, value) in values {
            self.indexes
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    /// Remove `key` from each value it was indexed under
    pub fn remove(&mut self, key: &str, values: &BTreeMap<String, IndexValue>) {
        for (name, value) in values {
            if let Some(postings) = self.indexes.get_mut(name) {
                if let Some(keys) = postings.get_mut(value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        postings.remove(value);
                    }
                }
            }
        }
    }

    /// Keys whose value for `name` satisfies `comparator` against `value`, ordered by key
    pub fn filter(&self, name: &str, comparator: Comparator, value: &str) -> Result<Vec<String>> {
        let keys: BTreeSet<&String> = self
            .buckets(name, comparator, value)?
            .into_iter()
            .flat_map(|keys| keys.iter())
            .collect();
        Ok(keys.into_iter().cloned().collect())
    }

    /// Number of keys matching the predicate
    pub fn count(&self, name: &str, comparator: Comparator, value: &str) -> Result<usize> {
        // One value per key and index, so buckets are disjoint
        Ok(self
            .buckets(name, comparator, value)?
            .iter()
            .map(|keys| keys.len())
            .sum())
    }

    /// Whether any key matches the predicate
    pub fn any(&self, name: &str, comparator: Comparator, value: &str) -> Result<bool> {
        Ok(self
            .buckets(name, comparator, value)?
            .iter()
            .any(|keys| !keys.is_empty()))
    }

    fn buckets(
        &self,
        name: &str,
        comparator: Comparator,
        value: &str,
    ) -> Result<Vec<&BTreeSet<String>>> {
        validate_index_name(name)?;

        // An index nobody declared has no entries
        let Some(index_type) = self.index_type(name) else {
            return Ok(Vec::new());
        };
        if comparator.is_ordering() && !index_type.is_orderable() {
            return Err(ModbError::validation(
                "comparator",
                format!(
                    "{} is not supported for index {} of type {}",
                    comparator, name, index_type
                ),
            ));
        }

        let target = index_type.parse_value(value)?;
        let Some(postings) = self.indexes.get(name) else {
            return Ok(Vec::new());
        };

        let buckets = match comparator {
            Comparator::Equal => postings.get(&target).into_iter().collect(),
            Comparator::NotEqual => postings
                .iter()
                .filter(|(v, _)| **v != target)
                .map(|(_, keys)| keys)
                .collect(),
            Comparator::GreaterThan => postings
                .range((Bound::Excluded(&target), Bound::Unbounded))
                .map(|(_, keys)| keys)
                .collect(),
            Comparator::GreaterOrEqual => postings.range(&target..).map(|(_, keys)| keys).collect(),
            Comparator::LessThan => postings.range(..&target).map(|(_, keys)| keys).collect(),
            Comparator::LessOrEqual => postings.range(..=&target).map(|(_, keys)| keys).collect(),
        };
        Ok(buckets)
    }
}
