//! Tag postings: tag -> keys carrying it

use std::collections::{BTreeMap, BTreeSet};

/// Inverted index from tag to record keys
#[derive(Debug, Default)]
pub struct TagIndex {
    postings: BTreeMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<'a>(&mut self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            self.postings
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    pub fn remove<'a>(&mut self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            if let Some(keys) = self.postings.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.postings.remove(tag);
                }
            }
        }
    }

    /// Keys carrying every tag in `tags`, ordered by key
    pub fn keys_with_all<'a>(&'a self, tags: &[String]) -> BTreeSet<&'a str> {
        let mut lists: Vec<&BTreeSet<String>> = Vec::with_capacity(tags.len());
        for tag in tags {
            match self.postings.get(tag) {
                Some(keys) => lists.push(keys),
                None => return BTreeSet::new(),
            }
        }
        // Walk the shortest posting list and check the others
        lists.sort_by_key(|keys| keys.len());
        let Some((smallest, rest)) = lists.split_first() else {
            return BTreeSet::new();
        };

        smallest
            .iter()
            .filter(|key| rest.iter().all(|keys| keys.contains(*key)))
            .map(|key| key.as_str())
            .collect()
    }

    /// Distinct tags containing `text`, in tag order
    pub fn matching<'a>(&'a self, text: Option<&'a str>) -> impl Iterator<Item = &'a String> + 'a {
        self.postings
            .keys()
            .filter(move |tag| text.map_or(true, |t| tag.contains(t)))
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_intersection() {
        let mut index = TagIndex::new();
        index.insert("a", &tags(&["red", "big"]));
        index.insert("b", &tags(&["red"]));
        index.insert("c", &tags(&["big"]));

        let red: Vec<_> = index.keys_with_all(&tags(&["red"])).into_iter().collect();
        assert_eq!(red, vec!["a", "b"]);

        let both: Vec<_> = index.keys_with_all(&tags(&["big", "red"])).into_iter().collect();
        assert_eq!(both, vec!["a"]);

        assert!(index.keys_with_all(&tags(&["red", "missing"])).is_empty());
    }

    #[test]
    fn test_remove_drops_empty_postings() {
        let mut index = TagIndex::new();
        index.insert("a", &tags(&["only"]));
        assert_eq!(index.len(), 1);
        index.remove("a", &tags(&["only"]));
        assert!(index.is_empty());
    }

    #[test]
    fn test_matching_text() {
        let mut index = TagIndex::new();
        index.insert("a", &tags(&["invoice-2023", "invoice-2024", "paid"]));

        let found: Vec<_> = index.matching(Some("invoice")).cloned().collect();
        assert_eq!(found, tags(&["invoice-2023", "invoice-2024"]));
        assert_eq!(index.matching(None).count(), 3);
        assert_eq!(index.matching(Some("2024")).count(), 1);
    }
}
