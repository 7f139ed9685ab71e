//! Deduplication of package items across sources.

use std::collections::HashSet;

use crate::models::{ItemKey, PackageItem};

/// Tracks which package versions have already been accepted.
///
/// The first copy of a key wins; later copies are rejected, never merged.
#[derive(Debug, Clone, Default)]
pub struct SeenItems {
    keys: HashSet<ItemKey>,
}

impl SeenItems {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item`; returns `false` if an item with the same key was seen before
    pub fn insert(&mut self, item: &PackageItem) -> bool {
        self.keys.insert(item.key())
    }

    /// Keep the items whose key is new, in order
    pub fn filter_new(&mut self, items: impl IntoIterator<Item = PackageItem>) -> Vec<PackageItem> {
        items.into_iter().filter(|item| self.insert(item)).collect()
    }
}
