//! Connectivity caches
//!
//! Both caches remember probe outcomes for URLs so the runtime does not hammer
//! endpoints. [`ConnectivityCache`] remembers URLs known to be good; absence means
//! "untested". [`OptimisticConnectivityCache`] remembers URLs known to be bad;
//! absence means "assumed good". Entries expire after a configurable TTL.

use crate::cache::{CacheError, EvictionCache};
use crate::config::ConnectivityConfig;
use crate::crawler::{ContentFetcher, FetchError, FetchResult, RequestOptions};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::{Arc, RwLock};
use url::Url;

/// A cached probe outcome for one URL
#[derive(Debug, Clone)]
pub struct ConnectivityEntry {
    /// When the outcome was recorded
    pub added_at: DateTime<Utc>,
}

impl ConnectivityEntry {
    pub fn new() -> Self {
        Self {
            added_at: Utc::now(),
        }
    }

    /// Checks if the entry is older than `ttl`
    pub fn is_stale(&self, ttl: Duration) -> bool {
        Utc::now() - self.added_at > ttl
    }
}

impl Default for ConnectivityEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Probes a URL once
///
/// The probe only succeeds on an HTML response with status 200.
pub async fn probe(fetcher: &dyn ContentFetcher, url: &str) -> Result<(), FetchError> {
    let target = Url::parse(url).map_err(|e| FetchError::Probe {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match fetcher.fetch(&RequestOptions::get(target)).await? {
        FetchResult::Html { status: 200, .. } => Ok(()),
        FetchResult::Html { status, .. } => Err(FetchError::Probe {
            url: url.to_string(),
            reason: format!("status {}", status),
        }),
        FetchResult::Json { .. } => Err(FetchError::Probe {
            url: url.to_string(),
            reason: "expected HTML, got JSON".to_string(),
        }),
    }
}

/// TTL-bounded set of entries shared by both cache flavors
#[derive(Debug)]
struct EntrySet {
    entries: RwLock<EvictionCache<String, ConnectivityEntry>>,
    ttl: Duration,
}

impl EntrySet {
    fn new(config: &ConnectivityConfig) -> Result<Self, CacheError> {
        let ttl = i64::try_from(config.ttl_minutes)
            .map(Duration::minutes)
            .map_err(|_| CacheError::InvalidTtl(config.ttl_minutes))?;
        Ok(Self {
            entries: RwLock::new(EvictionCache::new(config.capacity)?),
            ttl,
        })
    }

    fn contains_fresh(&self, url: &str) -> bool {
        let Ok(entries) = self.entries.read() else {
            return false;
        };
        entries
            .peek(&url.to_string())
            .map(|entry| !entry.is_stale(self.ttl))
            .unwrap_or(false)
    }

    fn insert(&self, url: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.add(url.to_string(), ConnectivityEntry::new());
        }
    }

    fn remove(&self, url: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&url.to_string());
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}

/// Remembers which URLs are currently reachable
///
/// A URL is only "ok" after a successful [`ConnectivityCache::test`] within the TTL.
#[derive(Clone)]
pub struct ConnectivityCache {
    good: Arc<EntrySet>,
    fetcher: Arc<dyn ContentFetcher>,
}

impl ConnectivityCache {
    pub fn new(
        config: &ConnectivityConfig,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            good: Arc::new(EntrySet::new(config)?),
            fetcher,
        })
    }

    /// Probes `url` once and records it as good on success
    pub async fn test(&self, url: &str) -> Result<(), FetchError> {
        probe(self.fetcher.as_ref(), url).await?;
        self.good.insert(url);
        tracing::debug!("Connectivity probe succeeded for {}", url);
        Ok(())
    }

    /// Pure membership check
    pub fn is_ok(&self, url: &str) -> bool {
        self.good.contains_fresh(url)
    }

    /// Returns true for cached-good URLs, otherwise runs `probe_fn`
    ///
    /// Concurrent callers for the same cold URL may both probe. Probes are
    /// idempotent so the race only costs an extra request.
    pub async fn is_valid_or_set<F, Fut>(&self, url: &str, probe_fn: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if self.is_ok(url) {
            return true;
        }
        probe_fn().await
    }

    /// Forgets a cached-good URL
    pub fn invalidate(&self, url: &str) {
        self.good.remove(url);
    }

    /// Number of remembered URLs
    pub fn len(&self) -> usize {
        self.good.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assumes URLs are reachable until a probe fails
///
/// Only invalidated URLs are ever re-probed.
#[derive(Clone)]
pub struct OptimisticConnectivityCache {
    bad: Arc<EntrySet>,
    probe_lock: Arc<tokio::sync::RwLock<()>>,
    fetcher: Arc<dyn ContentFetcher>,
}

impl OptimisticConnectivityCache {
    pub fn new(
        config: &ConnectivityConfig,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            bad: Arc::new(EntrySet::new(config)?),
            probe_lock: Arc::new(tokio::sync::RwLock::new(())),
            fetcher,
        })
    }

    /// Probes `url` once
    ///
    /// Success clears any invalidation; failure marks the URL bad and returns
    /// the probe error.
    pub async fn test(&self, url: &str) -> Result<(), FetchError> {
        match probe(self.fetcher.as_ref(), url).await {
            Ok(()) => {
                self.bad.remove(url);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Connectivity probe failed for {}: {}", url, e);
                self.bad.insert(url);
                Err(e)
            }
        }
    }

    /// True unless the URL was invalidated within the TTL
    pub fn is_ok(&self, url: &str) -> bool {
        !self.bad.contains_fresh(url)
    }

    /// Marks a URL as unreachable
    pub fn invalidate(&self, url: &str) {
        tracing::debug!("Invalidating connectivity for {}", url);
        self.bad.insert(url);
    }

    /// Short-circuits to true for URLs that are not invalidated, otherwise runs
    /// `probe_fn` while holding the probe lock
    ///
    /// Healthy URLs only take the shared side of the lock, so they never wait on
    /// each other. Re-probes of invalidated URLs are serialized; a caller that
    /// waited on another probe sees its outcome instead of probing again.
    pub async fn is_ok_and_set<F, Fut>(&self, url: &str, probe_fn: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        {
            let _shared = self.probe_lock.read().await;
            if self.is_ok(url) {
                return true;
            }
        }

        let _exclusive = self.probe_lock.write().await;
        if self.is_ok(url) {
            return true;
        }
        probe_fn().await
    }

    /// Probes the URL through [`Self::test`] if it is currently invalidated
    pub async fn ensure(&self, url: &str) -> bool {
        self.is_ok_and_set(url, || async { self.test(url).await.is_ok() })
            .await
    }
}
