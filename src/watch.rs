//! Polling loop for new results
//!
//! [`watch`] re-runs a query against an indexer on an interval and forwards every
//! result storage reports as new or updated. It runs until cancelled, or until a
//! login error makes further polling pointless.

use crate::indexer::Indexer;
use crate::search::{Query, ResultItem};
use crate::TrawlError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counters for a finished watch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub polls: usize,
    pub forwarded: usize,
    /// Polls that failed with a transient error
    pub failures: usize,
}

/// Polls `indexer` every `interval` and hands new or updated items to `sink`
///
/// Transient errors are logged and retried on the next tick.
///
/// # Errors
///
/// Returns the login error that stopped the loop. Cancellation is not an error.
pub async fn watch<F>(
    indexer: &dyn Indexer,
    query: &Query,
    interval: Duration,
    cancel: CancellationToken,
    mut sink: F,
) -> Result<WatchSummary, TrawlError>
where
    F: FnMut(ResultItem),
{
    let mut summary = WatchSummary::default();
    tracing::info!("Watching {} every {:?}", indexer.id(), interval);

    loop {
        let searched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            searched = indexer.search(query, None) => searched,
        };
        summary.polls += 1;

        match searched {
            Ok(outcome) => {
                for item in outcome.items {
                    if item.is_new || item.is_update {
                        summary.forwarded += 1;
                        sink(item);
                    }
                }
            }
            Err(e) if e.is_login_error() => {
                tracing::error!("Stopped watching {}: {}", indexer.id(), e);
                return Err(e);
            }
            Err(e) => {
                summary.failures += 1;
                tracing::warn!("{} poll failed, retrying in {:?}: {}", indexer.id(), interval, e);
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!(
        "Stopped watching {} after {} polls ({} forwarded)",
        indexer.id(),
        summary.polls,
        summary.forwarded
    );
    Ok(summary)
}
