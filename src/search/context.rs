use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Continuation state handed back by a search and passed into the next one
///
/// A runner reads `page`, `fields` and `start_index` to decide what to fetch. An
/// aggregate keeps one nested context per child in `children`, keyed by child id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContext {
    /// Number of results already returned by previous calls
    pub start_index: usize,
    /// Page to fetch; zero means "the definition's start page"
    pub page: u32,
    /// Current range-field values
    pub fields: BTreeMap<String, String>,
    pub children: BTreeMap<String, SearchContext>,
}

impl SearchContext {
    /// Context targeting a specific page and range-field state
    pub fn at_page(page: u32, fields: BTreeMap<String, String>) -> Self {
        Self {
            page,
            fields,
            ..Default::default()
        }
    }

    /// Context for the call after this one, which returned `found` results
    pub fn advance(&self, found: usize) -> Self {
        Self {
            start_index: self.start_index + found,
            page: self.page + 1,
            fields: self.fields.clone(),
            children: self.children.clone(),
        }
    }
}
