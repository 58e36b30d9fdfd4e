//! Indexers
//!
//! An [`Indexer`] is anything that can run a [`Query`] and hand back results: a
//! [`Runner`] executes one site definition, an [`Aggregate`] composes many. The
//! [`IndexerScope`] builds and owns the indexers of one configuration.

mod aggregate;
mod categories;
mod definition;
mod runner;
mod scope;

pub use aggregate::{interleave, Aggregate};
pub use categories::CategoryMap;
pub use definition::{
    DefinitionError, DefinitionSource, DirectorySource, ErrorBlock, FieldBlock, LoginBlock,
    LoginMethod, MemorySource, RowsBlock, SearchBlock, SearchMethod, SiteDefinition, TestBlock,
};
pub use runner::{NoopEnricher, QueryEnricher, Runner};
pub use scope::IndexerScope;

use crate::search::{Query, ResultItem, SearchContext};
use crate::storage::Storage;
use crate::TrawlError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What an indexer can do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Global category names the indexer can filter on
    pub categories: BTreeSet<String>,
    pub requires_login: bool,
}

impl Capabilities {
    /// Union of two capability sets
    pub fn merge(&mut self, other: &Capabilities) {
        self.categories.extend(other.categories.iter().cloned());
        self.requires_login |= other.requires_login;
    }
}

/// Items returned by one search call plus the context for the next call
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub items: Vec<ResultItem>,
    pub context: SearchContext,
}

/// A downloaded item body
#[derive(Debug, Clone)]
pub struct Download {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Capability set exposed by searchable sources
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Stable identity, unique within a scope
    fn id(&self) -> &str;

    /// Runs one search call
    ///
    /// Pass `None` on the first call and the returned context afterwards to
    /// continue where the previous call stopped.
    async fn search(
        &self,
        query: &Query,
        context: Option<SearchContext>,
    ) -> Result<SearchOutcome, TrawlError>;

    /// Fetches the item's download link
    async fn open(&self, item: &ResultItem) -> Result<Download, TrawlError>;

    fn capabilities(&self) -> Capabilities;

    /// Upper bound on pages walked per query, if any
    fn max_search_pages(&self) -> Option<u32>;

    fn search_is_single_paged(&self) -> bool;

    /// Health probe: resolve a reachable URL, log in and load the base page
    async fn check(&self) -> Result<(), TrawlError>;

    fn storage(&self) -> Option<Arc<dyn Storage>>;

    /// First page number of the site's pagination
    fn start_page(&self) -> u32 {
        1
    }

    /// Stop walking pages once already-known results show up
    fn stop_on_stale(&self) -> bool {
        false
    }
}
