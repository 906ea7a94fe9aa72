//! Inline → durable substitution tables

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Durable location and pixel size of an uploaded image
///
/// Produced once per inline image and never mutated afterwards.
/// A `0×0` size means the dimensions are unknown (e.g. SVG).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Stable, externally resolvable URL
    pub durable_url: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl AssetDescriptor {
    /// Create descriptor
    #[inline]
    #[must_use]
    pub fn new(durable_url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            durable_url: durable_url.into(),
            width,
            height,
        }
    }

    /// Whether pixel dimensions are known
    #[inline]
    #[must_use]
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Inline identifier → descriptor, for one batch
///
/// Ordered so that iteration (and anything derived from it) is deterministic.
/// Insertion is first-write-wins: an identifier keeps the descriptor it was
/// first given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionMap {
    entries: BTreeMap<String, AssetDescriptor>,
}

impl SubstitutionMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entry unless the identifier is already present
    ///
    /// Returns `true` if the entry was added.
    pub fn insert(&mut self, inline_id: impl Into<String>, descriptor: AssetDescriptor) -> bool {
        match self.entries.entry(inline_id.into()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Merge another map into this one (first write wins per key)
    pub fn merge(&mut self, other: &SubstitutionMap) {
        for (id, descriptor) in other {
            self.insert(id.clone(), descriptor.clone());
        }
    }

    /// Look up descriptor for inline identifier
    #[inline]
    #[must_use]
    pub fn get(&self, inline_id: &str) -> Option<&AssetDescriptor> {
        self.entries.get(inline_id)
    }

    /// Check whether identifier has a substitution
    #[inline]
    #[must_use]
    pub fn contains(&self, inline_id: &str) -> bool {
        self.entries.contains_key(inline_id)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in identifier order
    #[inline]
    pub fn iter(&self) -> btree_map::Iter<'_, String, AssetDescriptor> {
        self.entries.iter()
    }

    /// Distinct durable URLs in the map
    #[must_use]
    pub fn durable_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.entries.values().map(|d| d.durable_url.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        urls
    }
}

impl<'a> IntoIterator for &'a SubstitutionMap {
    type Item = (&'a String, &'a AssetDescriptor);
    type IntoIter = btree_map::Iter<'a, String, AssetDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, AssetDescriptor)> for SubstitutionMap {
    fn from_iter<I: IntoIterator<Item = (String, AssetDescriptor)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (id, descriptor) in iter {
            map.insert(id, descriptor);
        }
        map
    }
}

/// Session-lifetime accumulator of every substitution made so far
///
/// Add-only, unbounded: an image uploaded once in a session is never
/// uploaded again, even if it reappears later.
#[derive(Debug, Default)]
pub struct SubstitutionCache {
    inner: DashMap<String, AssetDescriptor>,
}

impl SubstitutionCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch; returns how many identifiers were new
    pub fn merge(&self, batch: &SubstitutionMap) -> usize {
        let mut added = 0;
        for (id, descriptor) in batch {
            self.inner.entry(id.clone()).or_insert_with(|| {
                added += 1;
                descriptor.clone()
            });
        }
        added
    }

    /// Cached descriptor for inline identifier
    #[inline]
    #[must_use]
    pub fn get(&self, inline_id: &str) -> Option<AssetDescriptor> {
        self.inner.get(inline_id).map(|entry| entry.value().clone())
    }

    /// Check whether identifier was already uploaded
    #[inline]
    #[must_use]
    pub fn contains(&self, inline_id: &str) -> bool {
        self.inner.contains_key(inline_id)
    }

    /// Point-in-time copy of all substitutions
    #[must_use]
    pub fn snapshot(&self) -> SubstitutionMap {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of cached identifiers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing has been cached yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> AssetDescriptor {
        AssetDescriptor::new(url, 10, 20)
    }

    #[test]
    fn map_insert_is_first_write_wins() {
        let mut map = SubstitutionMap::new();
        assert!(map.insert("data:a", descriptor("https://x/1")));
        assert!(!map.insert("data:a", descriptor("https://x/2")));
        assert_eq!(map.get("data:a").unwrap().durable_url, "https://x/1");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn map_merge_is_commutative_per_key() {
        let a: SubstitutionMap = [("data:a".to_string(), descriptor("u1"))].into_iter().collect();
        let b: SubstitutionMap = [("data:b".to_string(), descriptor("u2"))].into_iter().collect();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);

        let mut again = ab.clone();
        again.merge(&ab);
        assert_eq!(again, ab);
    }

    #[test]
    fn map_durable_urls_are_distinct() {
        let map: SubstitutionMap = [
            ("data:a".to_string(), descriptor("u1")),
            ("data:b".to_string(), descriptor("u1")),
            ("data:c".to_string(), descriptor("u2")),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.durable_urls(), vec!["u1", "u2"]);
    }

    #[test]
    fn cache_is_monotonic() {
        let cache = SubstitutionCache::new();
        let first: SubstitutionMap = [("data:a".to_string(), descriptor("u1"))].into_iter().collect();
        let second: SubstitutionMap = [
            ("data:a".to_string(), descriptor("other")),
            ("data:b".to_string(), descriptor("u2")),
        ]
        .into_iter()
        .collect();

        assert_eq!(cache.merge(&first), 1);
        assert_eq!(cache.merge(&second), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("data:a").unwrap().durable_url, "u1");
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn descriptor_dimensions() {
        assert!(AssetDescriptor::new("u", 1, 1).has_dimensions());
        assert!(!AssetDescriptor::new("u", 0, 0).has_dimensions());
    }

    #[test]
    fn descriptor_serde_roundtrip() {
        let d = descriptor("https://cdn/x.png");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("durable_url"));
        let back: AssetDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
