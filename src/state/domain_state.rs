use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Tracks request timing for one upstream host
///
/// This structure maintains the per-host information needed for pacing.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests made to this host
    pub request_count: u32,

    /// Timestamp of the last request to this host
    pub last_request_time: Option<Instant>,
}

impl DomainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request can be made now given the minimum delay
    pub fn can_request(&self, min_delay: Duration, now: Instant) -> bool {
        self.time_until_next_request(min_delay, now).is_none()
    }

    /// Records that a request was made to this host
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    /// The last request time may lie in the future when a slot was reserved ahead.
    pub fn time_until_next_request(&self, min_delay: Duration, now: Instant) -> Option<Duration> {
        let next = self.last_request_time? + min_delay;
        let wait = next.saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }
}

/// Enforces a minimum delay between requests to the same host
///
/// Shared by every session of a site; the delay comes from the definition's
/// `rate-limit-ms`.
#[derive(Debug)]
pub struct DomainPacer {
    min_delay: Duration,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl DomainPacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until a request to `domain` is allowed, then records it
    ///
    /// The slot is reserved before sleeping, so concurrent callers for the same
    /// host queue up one delay apart.
    pub async fn wait(&self, domain: &str) {
        if self.min_delay.is_zero() {
            return;
        }

        let wait = {
            let mut domains = self.domains.lock().await;
            let state = domains.entry(domain.to_string()).or_default();
            let now = tokio::time::Instant::now().into_std();
            let wait = state
                .time_until_next_request(self.min_delay, now)
                .unwrap_or_default();
            state.record_request(now + wait);
            wait
        };

        if !wait.is_zero() {
            tracing::debug!("Pacing {} for {:?}", domain, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of requests issued to `domain` so far
    pub async fn request_count(&self, domain: &str) -> u32 {
        self.domains
            .lock()
            .await
            .get(domain)
            .map(|s| s.request_count)
            .unwrap_or(0)
    }
}
