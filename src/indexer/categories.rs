use std::collections::{BTreeMap, BTreeSet};

/// Maps a site's local category ids to global category names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    local_to_global: BTreeMap<String, String>,
}

impl CategoryMap {
    pub fn new(local_to_global: BTreeMap<String, String>) -> Self {
        Self { local_to_global }
    }

    pub fn is_empty(&self) -> bool {
        self.local_to_global.is_empty()
    }

    /// Local ids whose global name is one of `global` (case-insensitive)
    pub fn local_ids(&self, global: &[String]) -> Vec<String> {
        self.local_to_global
            .iter()
            .filter(|(_, name)| global.iter().any(|g| g.eq_ignore_ascii_case(name)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Global names of a local category
    pub fn global_for(&self, local: Option<&str>) -> Vec<String> {
        local
            .and_then(|id| self.local_to_global.get(id.trim()))
            .map(|name| vec![name.clone()])
            .unwrap_or_default()
    }

    /// Whether an item in `category` passes a local-id filter
    ///
    /// An empty filter accepts everything.
    pub fn accepts(filter: &[String], category: Option<&str>) -> bool {
        filter.is_empty()
            || category.is_some_and(|c| filter.iter().any(|id| id == c.trim()))
    }

    /// Every global name the site maps to
    pub fn global_names(&self) -> BTreeSet<String> {
        self.local_to_global.values().cloned().collect()
    }
}
