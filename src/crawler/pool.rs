//! Concurrent multi-indexer crawl
//!
//! A [`WorkerPool`] walks several indexers through one query at the same time.
//! A feeder task pulls pages from each indexer's [`SearchStateIterator`] and
//! queues them as jobs; a fixed set of workers runs the searches and publishes
//! every page's outcome on a results channel. Results arrive in completion order,
//! not page order.

use crate::config::RuntimeConfig;
use crate::crawler::{IteratorStep, SearchStateIterator};
use crate::indexer::Indexer;
use crate::search::{Query, ResultItem, SearchContext};
use crate::TrawlError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Outcome of one page of one indexer
#[derive(Debug)]
pub struct JobOutput {
    pub indexer_id: String,
    pub page: u32,
    pub result: Result<Vec<ResultItem>, TrawlError>,
}

/// Everything a finished crawl produced
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub items: Vec<ResultItem>,
    /// Failed pages as `(indexer id, error)`
    pub failures: Vec<(String, TrawlError)>,
    pub pages: usize,
}

struct Slot {
    indexer: Arc<dyn Indexer>,
    iterator: Mutex<SearchStateIterator>,
    in_flight: AtomicBool,
    /// Nested child contexts from the last search, for aggregates
    children: std::sync::Mutex<BTreeMap<String, SearchContext>>,
}

struct Job {
    slot: usize,
    step: IteratorStep,
}

struct Shared {
    slots: Vec<Slot>,
    query: Query,
    /// Results still allowed under the query limit
    remaining: std::sync::Mutex<Option<usize>>,
    job_done: Notify,
    cancel: CancellationToken,
}

impl Shared {
    /// True once every iterator is complete or the limit is satisfied
    async fn is_complete(&self) -> bool {
        let mut discovered = 0;
        let mut all_complete = true;
        for slot in &self.slots {
            let iterator = slot.iterator.lock().await;
            discovered += iterator.discovered();
            all_complete &= iterator.is_complete();
        }
        all_complete || self.query.limit_reached(discovered)
    }

    /// Truncates `items` to the remaining quota and consumes it
    fn reserve(&self, items: &mut Vec<ResultItem>) {
        let mut remaining = self
            .remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = remaining.as_mut() {
            items.truncate(*remaining);
            *remaining -= items.len();
        }
    }
}

/// Runs one query across several indexers with a fixed number of workers
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: usize,
    job_queue_size: usize,
    result_queue_size: usize,
}

impl WorkerPool {
    /// Builds one pagination iterator per indexer
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::InvalidRange`] if the query's range fields are invalid.
    pub fn new(
        indexers: Vec<Arc<dyn Indexer>>,
        query: Query,
        runtime: &RuntimeConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TrawlError> {
        let slots = indexers
            .into_iter()
            .map(|indexer| {
                let iterator = SearchStateIterator::for_indexer(indexer.as_ref(), &query)?;
                Ok(Slot {
                    indexer,
                    iterator: Mutex::new(iterator),
                    in_flight: AtomicBool::new(false),
                    children: std::sync::Mutex::new(BTreeMap::new()),
                })
            })
            .collect::<Result<Vec<_>, TrawlError>>()?;

        Ok(Self {
            shared: Arc::new(Shared {
                slots,
                remaining: std::sync::Mutex::new(query.limit),
                query,
                job_done: Notify::new(),
                cancel,
            }),
            workers: runtime.workers.max(1),
            job_queue_size: runtime.job_queue_size.max(1),
            result_queue_size: runtime.result_queue_size.max(1),
        })
    }

    pub async fn is_complete(&self) -> bool {
        self.shared.is_complete().await
    }

    /// Starts the feeder and workers and returns the results channel
    ///
    /// The channel closes once every worker has exited.
    pub fn start(self) -> mpsc::Receiver<JobOutput> {
        let (job_tx, job_rx) = mpsc::channel(self.job_queue_size);
        let (result_tx, result_rx) = mpsc::channel(self.result_queue_size);
        let job_rx = Arc::new(Mutex::new(job_rx));

        tracing::debug!(
            "Starting crawl of {} indexers with {} workers",
            self.shared.slots.len(),
            self.workers
        );

        let tracker = TaskTracker::new();
        for worker in 0..self.workers {
            tracker.spawn(work(
                worker,
                Arc::clone(&self.shared),
                Arc::clone(&job_rx),
                result_tx.clone(),
            ));
        }
        tracker.close();

        tokio::spawn(feed(Arc::clone(&self.shared), job_tx));
        tokio::spawn(async move {
            tracker.wait().await;
            drop(result_tx);
            tracing::debug!("All crawl workers exited");
        });

        result_rx
    }

    /// Runs the crawl to completion and gathers every page's outcome
    pub async fn collect(self) -> CrawlSummary {
        let mut results = self.start();
        let mut summary = CrawlSummary::default();
        while let Some(output) = results.recv().await {
            summary.pages += 1;
            match output.result {
                Ok(items) => summary.items.extend(items),
                Err(e) => summary.failures.push((output.indexer_id, e)),
            }
        }
        summary
    }
}

/// Queues one job per idle, unfinished iterator, round-robin, until the crawl is
/// complete or cancelled
async fn feed(shared: Arc<Shared>, jobs: mpsc::Sender<Job>) {
    loop {
        if shared.cancel.is_cancelled() || shared.is_complete().await {
            break;
        }

        let mut dispatched = false;
        for (index, slot) in shared.slots.iter().enumerate() {
            if slot.in_flight.load(Ordering::SeqCst) {
                continue;
            }
            let Some(step) = slot.iterator.lock().await.next() else {
                continue;
            };

            slot.in_flight.store(true, Ordering::SeqCst);
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                sent = jobs.send(Job { slot: index, step }) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            dispatched = true;
        }

        if !dispatched {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                _ = shared.job_done.notified() => {}
            }
        }
    }
    tracing::debug!("Crawl feeder finished");
}

async fn work(
    worker: usize,
    shared: Arc<Shared>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobOutput>,
) {
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(Job { slot, step }) = job else {
            break;
        };

        let slot = &shared.slots[slot];
        let indexer_id = slot.indexer.id().to_string();
        let page = step.page;
        let context = SearchContext {
            start_index: step.start_index,
            page: step.page,
            fields: step.fields,
            children: slot
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        let searched = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            searched = slot.indexer.search(&shared.query, Some(context)) => searched,
        };

        let result = {
            let mut iterator = slot.iterator.lock().await;
            match searched {
                Ok(outcome) => {
                    *slot
                        .children
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = outcome.context.children;
                    let mut items = outcome.items;
                    shared.reserve(&mut items);
                    iterator.update_iterator_state(&items);
                    tracing::debug!(
                        "Worker {}: {} page {} gave {} results",
                        worker,
                        indexer_id,
                        page,
                        items.len()
                    );
                    Ok(items)
                }
                Err(e) => {
                    iterator.finish();
                    if e.is_login_error() {
                        tracing::error!("{}: {}", indexer_id, e);
                    } else {
                        tracing::warn!("{} page {} failed: {}", indexer_id, page, e);
                    }
                    Err(e)
                }
            }
        };
        slot.in_flight.store(false, Ordering::SeqCst);
        shared.job_done.notify_one();

        let output = JobOutput {
            indexer_id,
            page,
            result,
        };
        if results.send(output).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{Aggregate, Capabilities, Download, SearchOutcome};
    use crate::storage::Storage;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::time::Duration;

    /// Returns `per_page` items per page, forever or up to `pages`
    struct Paged {
        id: &'static str,
        per_page: usize,
        pages: Option<u32>,
        fail: bool,
    }

    #[async_trait]
    impl Indexer for Paged {
        fn id(&self) -> &str {
            self.id
        }

        async fn search(
            &self,
            _query: &Query,
            context: Option<SearchContext>,
        ) -> Result<SearchOutcome, TrawlError> {
            if self.fail {
                return Err(TrawlError::Unreachable {
                    site: self.id.to_string(),
                });
            }
            let context = context.unwrap_or_default();
            let items = (0..self.per_page)
                .map(|n| ResultItem {
                    site: self.id.to_string(),
                    title: format!("{} p{} #{}", self.id, context.page, n),
                    is_new: true,
                    ..Default::default()
                })
                .collect::<Vec<_>>();
            Ok(SearchOutcome {
                context: context.advance(items.len()),
                items,
            })
        }

        async fn open(&self, _item: &ResultItem) -> Result<Download, TrawlError> {
            Err(TrawlError::Cancelled)
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        fn max_search_pages(&self) -> Option<u32> {
            self.pages
        }

        fn search_is_single_paged(&self) -> bool {
            false
        }

        async fn check(&self) -> Result<(), TrawlError> {
            Ok(())
        }

        fn storage(&self) -> Option<Arc<dyn Storage>> {
            None
        }
    }

    fn paged(id: &'static str, per_page: usize, pages: Option<u32>) -> Arc<dyn Indexer> {
        Arc::new(Paged {
            id,
            per_page,
            pages,
            fail: false,
        })
    }

    async fn run(indexers: Vec<Arc<dyn Indexer>>, query: Query) -> CrawlSummary {
        let pool = WorkerPool::new(
            indexers,
            query,
            &RuntimeConfig::default(),
            CancellationToken::new(),
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(10), pool.collect())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_zero_indexers_completes_immediately() {
        let pool = WorkerPool::new(
            Vec::new(),
            Query::new("x"),
            &RuntimeConfig::default(),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(pool.is_complete().await);

        let summary = tokio::time::timeout(Duration::from_secs(5), pool.collect())
            .await
            .unwrap();
        assert!(summary.items.is_empty());
        assert_eq!(summary.pages, 0);
    }

    #[tokio::test]
    async fn test_walks_every_page() {
        let summary = run(
            vec![paged("a", 2, Some(3)), paged("b", 1, Some(2))],
            Query::new("x"),
        )
        .await;

        assert_eq!(summary.pages, 5);
        assert_eq!(summary.items.len(), 8);
        let titles: BTreeSet<&str> = summary.items.iter().map(|i| i.title.as_str()).collect();
        assert!(titles.contains("a p3 #1"));
        assert!(titles.contains("b p2 #0"));
        assert!(!titles.contains("a p4 #0"));
    }

    #[tokio::test]
    async fn test_limit_caps_total_results() {
        let summary = run(
            vec![paged("a", 5, None), paged("b", 5, None)],
            Query::new("x").with_limit(7),
        )
        .await;

        assert_eq!(summary.items.len(), 7);
    }

    #[tokio::test]
    async fn test_failed_indexer_is_finished() {
        let broken: Arc<dyn Indexer> = Arc::new(Paged {
            id: "broken",
            per_page: 1,
            pages: None,
            fail: true,
        });
        let summary = run(vec![broken, paged("ok", 1, Some(2))], Query::new("x")).await;

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "broken");
        assert_eq!(summary.items.len(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_children_keep_their_pages() {
        let aggregate = Aggregate::new(
            "all",
            vec![paged("a", 1, Some(3)), paged("b", 1, Some(3))],
            2,
        )
        .unwrap();
        let summary = run(vec![Arc::new(aggregate) as Arc<dyn Indexer>], Query::new("x")).await;

        assert_eq!(summary.pages, 3);
        let titles: BTreeSet<&str> = summary.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles.len(), 6);
        assert!(titles.contains("a p2 #0"));
        assert!(titles.contains("b p2 #0"));
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let result = WorkerPool::new(
            vec![paged("a", 1, None)],
            Query::new("x").with_range("offset", "10", "1"),
            &RuntimeConfig::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(TrawlError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_crawl_stops() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            vec![paged("a", 1, None)],
            Query::new("x"),
            &RuntimeConfig::default(),
            cancel.clone(),
        )
        .unwrap();
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), pool.collect())
            .await
            .unwrap();
        assert!(summary.items.is_empty());
    }
}
