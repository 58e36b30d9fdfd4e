//! Crawler module for fetching and walking result pages
//!
//! This module contains the page-level crawling machinery:
//! - The content-fetching contract and its HTTP implementation
//! - Row and field extraction from HTML and JSON pages
//! - Per-indexer pagination cursors
//! - The worker pool that crawls several indexers concurrently

mod fetcher;
mod iterator;
pub mod parser;
mod pool;

pub use fetcher::{
    build_http_client, ContentFetcher, FetchError, FetchResult, FetcherFactory, HttpFetcher,
    HttpFetcherFactory, Method, RawResponse, RequestOptions,
};
pub use iterator::{IteratorStep, SearchStateIterator};
pub use pool::{CrawlSummary, JobOutput, WorkerPool};

use crate::config::Config;
use crate::indexer::IndexerScope;
use crate::search::Query;
use crate::TrawlError;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl of the selected sites
///
/// This is the main entry point for a one-shot search. It will:
/// 1. Build the indexer scope (definitions, transport, storage)
/// 2. Select the indexers matching `selector`
/// 3. Walk their result pages concurrently until the query is satisfied
///
/// # Arguments
///
/// * `config` - The runtime configuration
/// * `selector` - `None`, `"all"` or a comma-separated list of site names
/// * `query` - What to search for
/// * `cancel` - Stops the crawl early when cancelled
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Crawl finished; per-page failures are in the summary
/// * `Err(TrawlError)` - The crawl could not be set up
pub async fn crawl(
    config: Config,
    selector: Option<&str>,
    query: Query,
    cancel: CancellationToken,
) -> Result<CrawlSummary, TrawlError> {
    let runtime = config.runtime.clone();
    let scope = IndexerScope::from_config(config)?;
    let indexers = scope.lookup(selector)?;
    let pool = WorkerPool::new(indexers, query, &runtime, cancel)?;
    let summary = pool.collect().await;

    if let Some(storage) = scope.storage() {
        storage.close()?;
    }
    Ok(summary)
}
