//! Per-indexer pagination cursor
//!
//! A [`SearchStateIterator`] drives one indexer through a query. It supports plain
//! page-number pagination and "range" fields, query parameters paginated by
//! incrementing a zero-padded number, through the same interface.

use crate::indexer::Indexer;
use crate::search::{Query, RangeField, ResultItem};
use crate::TrawlError;
use std::collections::BTreeMap;

/// Work produced by one [`SearchStateIterator::next`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorStep {
    /// Current range-field values
    pub fields: BTreeMap<String, String>,
    pub page: u32,
    /// Items discovered before this step
    pub start_index: usize,
}

#[derive(Debug, Clone)]
struct RangeCursor {
    name: String,
    current: u64,
    end: u64,
    width: usize,
    exhausted: bool,
}

impl RangeCursor {
    fn parse(field: &RangeField) -> Result<Self, TrawlError> {
        let invalid = |message: String| TrawlError::InvalidRange {
            field: field.name.clone(),
            message,
        };
        let start: u64 = field
            .start
            .trim()
            .parse()
            .map_err(|_| invalid(format!("start '{}' is not a number", field.start)))?;
        let end: u64 = field
            .end
            .trim()
            .parse()
            .map_err(|_| invalid(format!("end '{}' is not a number", field.end)))?;
        if start > end {
            return Err(invalid(format!("start {} is after end {}", start, end)));
        }

        Ok(Self {
            name: field.name.clone(),
            current: start,
            end,
            width: field.start.trim().len(),
            exhausted: false,
        })
    }

    fn value(&self) -> String {
        format!("{:0width$}", self.current, width = self.width)
    }

    fn advance(&mut self) {
        if self.current < self.end {
            self.current += 1;
        } else {
            self.exhausted = true;
        }
    }
}

/// Cursor over the pages and range-field values of one indexer
///
/// The page number never decreases. Created per query per indexer.
#[derive(Debug, Clone)]
pub struct SearchStateIterator {
    indexer_id: String,
    start_page: u32,
    page: u32,
    page_limit: Option<u32>,
    pages_traversed: u32,
    ranges: Vec<RangeCursor>,
    discovered: usize,
    stop_on_stale: bool,
    reached_stale: bool,
    reached_empty: bool,
    finished: bool,
}

impl SearchStateIterator {
    /// Creates an iterator
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::InvalidRange`] if a range bound is not a number or the
    /// range is reversed.
    pub fn new(
        indexer_id: impl Into<String>,
        start_page: u32,
        page_limit: Option<u32>,
        stop_on_stale: bool,
        ranges: &[RangeField],
    ) -> Result<Self, TrawlError> {
        let ranges = ranges
            .iter()
            .map(RangeCursor::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            indexer_id: indexer_id.into(),
            start_page,
            page: start_page,
            page_limit,
            pages_traversed: 0,
            ranges,
            discovered: 0,
            stop_on_stale,
            reached_stale: false,
            reached_empty: false,
            finished: false,
        })
    }

    /// Creates the iterator an indexer needs for a query
    ///
    /// Single-paged indexers get a page limit of one.
    pub fn for_indexer(indexer: &dyn Indexer, query: &Query) -> Result<Self, TrawlError> {
        let page_limit = if indexer.search_is_single_paged() {
            Some(1)
        } else {
            indexer.max_search_pages()
        };
        Self::new(
            indexer.id(),
            indexer.start_page(),
            page_limit,
            indexer.stop_on_stale(),
            &query.ranges,
        )
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    pub fn pages_traversed(&self) -> u32 {
        self.pages_traversed
    }

    /// Items reported through [`Self::update_iterator_state`] so far
    pub fn discovered(&self) -> usize {
        self.discovered
    }

    pub fn reached_stale(&self) -> bool {
        self.reached_stale
    }

    /// Returns the current state, then advances every range field and the page
    ///
    /// Returns `None` once the iterator is complete.
    pub fn next(&mut self) -> Option<IteratorStep> {
        if self.is_complete() {
            return None;
        }

        let step = IteratorStep {
            fields: self
                .ranges
                .iter()
                .map(|r| (r.name.clone(), r.value()))
                .collect(),
            page: self.page,
            start_index: self.discovered,
        };

        for range in &mut self.ranges {
            range.advance();
        }
        self.page += 1;
        self.pages_traversed += 1;

        Some(step)
    }

    /// True when no more work should be produced
    ///
    /// Complete once the page limit is met, once every range field is exhausted,
    /// once a stale item was seen with stop-on-stale enabled, once a page came back
    /// empty, or after [`Self::finish`].
    pub fn is_complete(&self) -> bool {
        if self.finished || self.reached_empty {
            return true;
        }
        if let Some(limit) = self.page_limit {
            if self.pages_traversed > 0 && self.pages_traversed >= limit {
                return true;
            }
        }
        if !self.ranges.is_empty() && self.ranges.iter().all(|r| r.exhausted) {
            return true;
        }
        self.stop_on_stale && self.reached_stale
    }

    /// Records the items a step produced
    pub fn update_iterator_state(&mut self, items: &[ResultItem]) {
        self.discovered += items.len();
        if items.is_empty() {
            self.reached_empty = true;
        }
        if self.stop_on_stale && !self.reached_stale && items.iter().any(|i| !i.is_new) {
            tracing::debug!(
                "{} reached already-known results at page {}",
                self.indexer_id,
                self.page.saturating_sub(1)
            );
            self.reached_stale = true;
        }
    }

    /// Marks the iterator complete, e.g. after an error
    pub fn finish(&mut self) {
        self.finished = true;
    }
}
