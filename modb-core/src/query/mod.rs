//! Query and pagination helpers shared by every listing operation
//!
//! Candidate sequences are always produced in key order, so slicing the same
//! data twice yields the same page.

use crate::index::TagIndex;
use crate::validate::{validate_page, validate_tag};
use crate::{PagedList, Record, Result, TimeRange, Timestamp};
use std::collections::BTreeMap;

/// A 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    /// Validated page request
    pub fn new(page: usize, page_size: usize) -> Result<Self> {
        validate_page(page, page_size)?;
        Ok(Self { page, page_size })
    }

    /// A single page holding everything
    pub fn all() -> Self {
        Self {
            page: 1,
            page_size: usize::MAX,
        }
    }

    /// Zero-based index of the first item on this page
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Slice an ordered candidate sequence to one page
///
/// The whole sequence is walked to report the total; only the items on the
/// page are kept.
pub fn paginate<T>(candidates: impl IntoIterator<Item = T>, page: Page) -> PagedList<T> {
    let offset = page.offset();
    let mut items = Vec::new();
    let mut total = 0usize;

    for item in candidates {
        if total >= offset && items.len() < page.page_size {
            items.push(item);
        }
        total += 1;
    }

    let total_pages = if total == 0 {
        0
    } else {
        (total - 1) / page.page_size + 1
    };

    PagedList {
        items,
        page: page.page,
        page_size: page.page_size,
        total_items: total,
        total_pages,
    }
}

/// Tag and time filter over records
///
/// Multiple tags combine with AND: a record must carry every listed tag.
/// An empty tag list selects all records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub tags: Vec<String>,
    pub range: TimeRange,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, from: Timestamp) -> Self {
        self.range.from = Some(from);
        self
    }

    pub fn to(mut self, to: Timestamp) -> Self {
        self.range.to = Some(to);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for tag in &self.tags {
            validate_tag(tag)?;
        }
        Ok(())
    }

    /// Records matching the query, ordered by key
    pub fn select<'a>(
        &self,
        records: &'a BTreeMap<String, Record>,
        tags: &'a TagIndex,
    ) -> Vec<&'a Record> {
        if self.tags.is_empty() {
            return records
                .values()
                .filter(|r| self.range.contains(r.timestamp))
                .collect();
        }

        tags.keys_with_all(&self.tags)
            .into_iter()
            .filter_map(|key| records.get(key))
            .filter(|r| self.range.contains(r.timestamp))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(key: &str, tags: &[&str], timestamp: Timestamp) -> Record {
        Record {
            key: key.to_string(),
            value: format!("value-{}", key),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            indexes: BTreeMap::new(),
            timestamp,
        }
    }

    fn fixture() -> (BTreeMap<String, Record>, TagIndex) {
        let mut records = BTreeMap::new();
        let mut tags = TagIndex::new();
        for r in [
            record("k1", &["paid"], 100),
            record("k2", &["paid", "eu"], 200),
            record("k3", &["pending", "eu"], 300),
            record("k4", &[], 400),
        ] {
            tags.insert(&r.key, &r.tags);
            records.insert(r.key.clone(), r);
        }
        (records, tags)
    }

    fn keys(selected: Vec<&Record>) -> Vec<&str> {
        selected.into_iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_paginate() {
        let page = paginate(1..=25, Page::new(2, 10).unwrap());
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.total_items, 25);
        assert_eq!(page.total_pages, 3);

        let last = paginate(1..=25, Page::new(3, 10).unwrap());
        assert_eq!(last.items, vec![21, 22, 23, 24, 25]);

        let beyond = paginate(1..=25, Page::new(9, 10).unwrap());
        assert!(beyond.is_empty());
        assert_eq!(beyond.total_items, 25);

        let empty = paginate(Vec::<u32>::new(), Page::default());
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_page_validation() {
        assert!(Page::new(0, 10).is_err());
        assert!(Page::new(1, 0).is_err());
        assert_eq!(Page::all().offset(), 0);
        assert_eq!(Page::new(usize::MAX, usize::MAX).unwrap().offset(), usize::MAX);
    }

    #[test]
    fn test_single_and_multi_tag_queries() {
        let (records, tags) = fixture();

        let paid = RecordQuery::new().with_tag("paid");
        assert_eq!(keys(paid.select(&records, &tags)), vec!["k1", "k2"]);

        let paid_eu = RecordQuery::new().with_tags(["paid", "eu"]);
        assert_eq!(keys(paid_eu.select(&records, &tags)), vec!["k2"]);

        let none = RecordQuery::new().with_tags(["paid", "pending"]);
        assert!(none.select(&records, &tags).is_empty());

        assert_eq!(RecordQuery::new().select(&records, &tags).len(), 4);
    }

    #[test]
    fn test_time_range_query() {
        let (records, tags) = fixture();

        let window = RecordQuery::new().from(200).to(300);
        assert_eq!(keys(window.select(&records, &tags)), vec!["k2", "k3"]);

        let eu_after = RecordQuery::new().with_tag("eu").from(250);
        assert_eq!(keys(eu_after.select(&records, &tags)), vec!["k3"]);
    }
}
