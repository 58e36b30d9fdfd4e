use crate::indexer::{Capabilities, Download, Indexer, SearchOutcome};
use crate::search::{Query, ResultItem, SearchContext};
use crate::session::LoginError;
use crate::storage::Storage;
use crate::TrawlError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Indexer that fans a query out to several children
///
/// Child failures are logged and count as "no results" for that call. A child
/// whose login fails is left out of every later call; once no child is left the
/// login error is returned. Results are interleaved by position so no single
/// child dominates the head of the feed.
pub struct Aggregate {
    id: String,
    children: Vec<Arc<dyn Indexer>>,
    max_parallel: usize,
    abandoned: Mutex<BTreeSet<String>>,
}

impl Aggregate {
    /// Creates an aggregate over `children`, searched at most `max_parallel` at a time
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::DuplicateIndexer`] if two children share an id.
    pub fn new(
        id: impl Into<String>,
        children: Vec<Arc<dyn Indexer>>,
        max_parallel: usize,
    ) -> Result<Self, TrawlError> {
        let mut seen = HashSet::new();
        for child in &children {
            if !seen.insert(child.id().to_string()) {
                return Err(TrawlError::DuplicateIndexer(child.id().to_string()));
            }
        }

        Ok(Self {
            id: id.into(),
            children,
            max_parallel: max_parallel.max(1),
            abandoned: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn children(&self) -> &[Arc<dyn Indexer>] {
        &self.children
    }

    /// Ids of children dropped after a login failure
    pub fn abandoned(&self) -> BTreeSet<String> {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn child(&self, id: &str) -> Option<&Arc<dyn Indexer>> {
        self.children.iter().find(|c| c.id() == id)
    }
}

/// Merges lists round-robin by position: every list's first item, then every
/// list's second item, and so on
pub fn interleave<T>(lists: Vec<Vec<T>>) -> Vec<T> {
    let total = lists.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::with_capacity(total);

    while merged.len() < total {
        for iter in &mut iters {
            if let Some(item) = iter.next() {
                merged.push(item);
            }
        }
    }
    merged
}

#[async_trait]
impl Indexer for Aggregate {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(
        &self,
        query: &Query,
        context: Option<SearchContext>,
    ) -> Result<SearchOutcome, TrawlError> {
        let mut context = context.unwrap_or_default();
        let abandoned = self.abandoned();
        if !self.children.is_empty() && abandoned.len() == self.children.len() {
            return Err(LoginError::Abandoned {
                site: self.id.clone(),
            }
            .into());
        }

        let searches: Vec<_> = self
            .children
            .iter()
            .filter(|child| !abandoned.contains(child.id()))
            .map(|child| {
                let child_context = context.children.get(child.id()).cloned();
                async move {
                    let result = child.search(query, child_context.clone()).await;
                    (child.id().to_string(), child_context, result)
                }
            })
            .collect();
        let outcomes: Vec<_> = stream::iter(searches)
            .buffered(self.max_parallel)
            .collect()
            .await;

        let mut lists = Vec::with_capacity(outcomes.len());
        let mut login_error = None;
        for (child_id, previous, result) in outcomes {
            match result {
                Ok(outcome) => {
                    context.children.insert(child_id, outcome.context);
                    lists.push(outcome.items);
                }
                Err(e) if e.is_login_error() => {
                    tracing::error!("{}: {}, leaving it out of later searches", child_id, e);
                    self.abandoned
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(child_id.clone());
                    context
                        .children
                        .insert(child_id, previous.unwrap_or_default());
                    login_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!("{}: search failed, skipping this round: {}", child_id, e);
                    context
                        .children
                        .insert(child_id, previous.unwrap_or_default());
                }
            }
        }

        if let Some(e) = login_error {
            if self.abandoned().len() == self.children.len() {
                return Err(e);
            }
        }

        let mut items = interleave(lists);
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }

        context.start_index += items.len();
        context.page += 1;
        Ok(SearchOutcome { items, context })
    }

    async fn open(&self, item: &ResultItem) -> Result<Download, TrawlError> {
        match self.child(&item.site) {
            Some(child) => child.open(item).await,
            None => Err(TrawlError::UnknownIndexer(item.site.clone())),
        }
    }

    fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::default();
        for child in &self.children {
            capabilities.merge(&child.capabilities());
        }
        capabilities
    }

    /// The largest page bound among children; unbounded if any child is
    ///
    /// An aggregate without children has a single empty page.
    fn max_search_pages(&self) -> Option<u32> {
        let mut max = Some(1);
        for child in &self.children {
            max = match (max, child.max_search_pages()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        }
        max
    }

    fn search_is_single_paged(&self) -> bool {
        self.children.iter().all(|c| c.search_is_single_paged())
    }

    async fn check(&self) -> Result<(), TrawlError> {
        for child in &self.children {
            child.check().await?;
        }
        Ok(())
    }

    /// Aggregates have no store of their own
    fn storage(&self) -> Option<Arc<dyn Storage>> {
        None
    }
}
