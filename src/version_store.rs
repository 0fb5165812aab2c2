//! Element version store — last version sent or received per element id.
//!
//! The store is what makes outbound sync a delta: an element is written to
//! the replicated document only when its version is above the recorded one.
//! It is scoped to one room session and cleared when that session closes.

use std::collections::HashMap;

use crate::element::{Element, ElementId};

#[derive(Debug, Default, Clone)]
pub struct ElementVersionStore {
    versions: HashMap<ElementId, u64>,
}

impl ElementVersionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_synced(&self, id: &str) -> Option<u64> {
        self.versions.get(id).copied()
    }

    /// Record that `element` has been sent or received. Never lowers a version.
    pub fn record(&mut self, element: &Element) {
        let entry = self.versions.entry(element.id.clone()).or_insert(0);
        if element.version > *entry {
            *entry = element.version;
        }
    }

    #[must_use]
    pub fn needs_sync(&self, element: &Element) -> bool {
        self.last_synced(&element.id)
            .is_none_or(|last| element.version > last)
    }

    /// Elements whose version moved past what was last synced.
    pub fn delta<'a>(&self, elements: &'a [Element]) -> impl Iterator<Item = &'a Element> {
        elements.iter().filter(|e| self.needs_sync(e))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
    }
}

#[cfg(test)]
#[path = "version_store_test.rs"]
mod tests;
