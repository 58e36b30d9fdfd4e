use crate::cache::OptimisticConnectivityCache;
use crate::config::SiteConfig;
use crate::crawler::FetcherFactory;
use crate::indexer::SiteDefinition;
use crate::session::BrowsingSession;
use crate::state::DomainPacer;
use crate::TrawlError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;

/// Everything needed to build sessions for one site
#[derive(Clone)]
pub struct SessionTemplate {
    pub definition: Arc<SiteDefinition>,
    pub site_config: Arc<SiteConfig>,
    pub factory: Arc<dyn FetcherFactory>,
    pub connectivity: Arc<OptimisticConnectivityCache>,
    pub pacer: Arc<DomainPacer>,
    pub verify_interval: Duration,
}

impl SessionTemplate {
    /// Builds a session with its own cookie jar
    pub fn build(&self, id: usize) -> Result<BrowsingSession, TrawlError> {
        let fetcher = self.factory.create()?;
        Ok(BrowsingSession::new(
            id,
            Arc::clone(&self.definition),
            Arc::clone(&self.site_config),
            fetcher,
            Arc::clone(&self.connectivity),
            Arc::clone(&self.pacer),
        )
        .with_verify_interval(self.verify_interval))
    }
}

/// Pool of independently authenticated sessions for one site
///
/// Sessions are handed out round-robin so load spreads across cookie jars.
pub struct SessionMultiplexer {
    site: String,
    sessions: Vec<Arc<Mutex<BrowsingSession>>>,
    next: AtomicUsize,
}

impl SessionMultiplexer {
    /// Builds `size` sessions concurrently
    ///
    /// Each session resolves its base URL while being built. Any failure aborts the
    /// remaining builds and fails the multiplexer.
    pub async fn new(size: usize, template: SessionTemplate) -> Result<Self, TrawlError> {
        let site = template.definition.id.clone();
        if size == 0 {
            return Err(TrawlError::Session(format!(
                "{} needs at least one session",
                site
            )));
        }

        let mut builds = JoinSet::new();
        for id in 0..size {
            let template = template.clone();
            builds.spawn(async move {
                let mut session = template.build(id)?;
                session.connect().await?;
                Ok::<_, TrawlError>(session)
            });
        }

        let mut sessions = Vec::with_capacity(size);
        while let Some(joined) = builds.join_next().await {
            let built = joined
                .map_err(|e| TrawlError::Session(format!("session task failed: {}", e)))
                .and_then(|result| result);
            match built {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    builds.abort_all();
                    return Err(e);
                }
            }
        }
        sessions.sort_by_key(BrowsingSession::id);

        tracing::debug!("Built {} sessions for {}", size, site);
        Ok(Self {
            site,
            sessions: sessions
                .into_iter()
                .map(|s| Arc::new(Mutex::new(s)))
                .collect(),
            next: AtomicUsize::new(0),
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    /// Takes the next session round-robin and prepares it for use
    ///
    /// Waits while another caller holds that session. The session is released
    /// when the lease is dropped.
    pub async fn acquire(&self) -> Result<SessionLease, TrawlError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut guard = Arc::clone(&self.sessions[index]).lock_owned().await;
        guard.setup().await?;
        Ok(SessionLease { guard })
    }
}

/// Exclusive use of one session until dropped
#[derive(Debug)]
pub struct SessionLease {
    guard: OwnedMutexGuard<BrowsingSession>,
}

impl Deref for SessionLease {
    type Target = BrowsingSession;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
