//! Browsing sessions
//!
//! A [`BrowsingSession`] owns one cookie jar (through its fetcher) and the login
//! state that goes with it. It resolves a reachable base URL, logs in with the
//! definition's strategy, verifies the login and paces every request it issues.

use crate::cache::OptimisticConnectivityCache;
use crate::config::SiteConfig;
use crate::crawler::parser::{has_match, select_text};
use crate::crawler::{ContentFetcher, FetchError, FetchResult, RawResponse, RequestOptions};
use crate::indexer::{ErrorBlock, LoginBlock, SiteDefinition, TestBlock};
use crate::search::template::{render, variables, TemplateVars};
use crate::session::login::{LoginError, LoginStrategy};
use crate::state::{DomainPacer, LoginState};
use crate::TrawlError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// How long a verified login is trusted before it is probed again
pub const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_secs(300);

/// One authenticated (or anonymous) view of a site
pub struct BrowsingSession {
    id: usize,
    definition: Arc<SiteDefinition>,
    site_config: Arc<SiteConfig>,
    fetcher: Arc<dyn ContentFetcher>,
    connectivity: Arc<OptimisticConnectivityCache>,
    pacer: Arc<DomainPacer>,
    state: LoginState,
    base_url: Option<Url>,
    verified_at: Option<Instant>,
    verify_interval: Duration,
}

impl BrowsingSession {
    pub fn new(
        id: usize,
        definition: Arc<SiteDefinition>,
        site_config: Arc<SiteConfig>,
        fetcher: Arc<dyn ContentFetcher>,
        connectivity: Arc<OptimisticConnectivityCache>,
        pacer: Arc<DomainPacer>,
    ) -> Self {
        let state = LoginState::initial(definition.has_login());
        Self {
            id,
            definition,
            site_config,
            fetcher,
            connectivity,
            pacer,
            state,
            base_url: None,
            verified_at: None,
            verify_interval: DEFAULT_VERIFY_INTERVAL,
        }
    }

    /// Sets how long a verified login is trusted; zero re-verifies on every use
    pub fn with_verify_interval(mut self, interval: Duration) -> Self {
        self.verify_interval = interval;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn site(&self) -> &str {
        &self.definition.id
    }

    /// Resolves the base URL without logging in
    pub async fn connect(&mut self) -> Result<Url, TrawlError> {
        self.ensure_base_url().await
    }

    /// The resolved base URL
    pub fn base_url(&self) -> Result<&Url, TrawlError> {
        self.base_url.as_ref().ok_or_else(|| TrawlError::Unreachable {
            site: self.definition.id.clone(),
        })
    }

    /// Candidate base URLs; a configured `url` replaces the definition's links
    fn candidates(&self) -> Vec<String> {
        match &self.site_config.url {
            Some(url) => vec![url.clone()],
            None => self.definition.links.clone(),
        }
    }

    /// Picks the first candidate the connectivity cache considers reachable
    async fn ensure_base_url(&mut self) -> Result<Url, TrawlError> {
        if let Some(url) = &self.base_url {
            if self.connectivity.is_ok(url.as_str()) {
                return Ok(url.clone());
            }
        }

        for candidate in self.candidates() {
            if self.connectivity.ensure(&candidate).await {
                let url = Url::parse(&candidate)?;
                if self.base_url.as_ref() != Some(&url) {
                    tracing::debug!("{} session {} using {}", self.definition.id, self.id, url);
                }
                self.base_url = Some(url.clone());
                return Ok(url);
            }
        }

        self.base_url = None;
        Err(TrawlError::Unreachable {
            site: self.definition.id.clone(),
        })
    }

    /// Prepares the session for use
    ///
    /// Resolves the base URL, re-verifies a login whose verification is due and
    /// logs in when required. A no-op for sessions that are logged in and were
    /// verified recently.
    pub async fn setup(&mut self) -> Result<(), TrawlError> {
        self.ensure_base_url().await?;

        if self.state == LoginState::LoggedIn && self.verification_due() {
            if let Some(login) = self.definition.login.clone() {
                if self.verify(&login, None).await? {
                    self.verified_at = Some(Instant::now());
                } else {
                    self.state = self.state.on_verification_failure();
                    tracing::info!(
                        "{} session {} login expired, logging in again",
                        self.definition.id,
                        self.id
                    );
                }
            }
        }

        if self.state.needs_login() {
            self.login().await?;
        }
        Ok(())
    }

    fn verification_due(&self) -> bool {
        match self.verified_at {
            Some(at) => at.elapsed() >= self.verify_interval,
            None => true,
        }
    }

    /// Logs in with the definition's strategy and verifies the result
    pub async fn login(&mut self) -> Result<(), TrawlError> {
        let Some(login) = self.definition.login.clone() else {
            self.state = LoginState::NoLoginRequired;
            return Ok(());
        };

        match self.attempt_login(&login).await {
            Ok(()) => {
                self.state = self.state.on_login_success();
                self.verified_at = Some(Instant::now());
                tracing::info!("{} session {} logged in", self.definition.id, self.id);
                Ok(())
            }
            Err(e) => {
                if self.state != LoginState::LoginFailed {
                    tracing::warn!("{} session {} login failed: {}", self.definition.id, self.id, e);
                }
                self.state = self.state.on_login_failure();
                Err(e)
            }
        }
    }

    async fn attempt_login(&mut self, login: &LoginBlock) -> Result<(), TrawlError> {
        let base = self.ensure_base_url().await?;
        let inputs = self.login_inputs(login)?;

        if let Some(init) = &login.init {
            let url = base.join(init)?;
            tracing::debug!("Priming login with {}", url);
            self.fetch(&RequestOptions::get(url)).await?;
        }

        let strategy = LoginStrategy::from_block(login);
        self.pacer.wait(base.host_str().unwrap_or_default()).await;
        let result = strategy
            .perform(self.fetcher.as_ref(), &base, &inputs)
            .await
            .inspect_err(|e| self.note_failure(e))?;

        if let Some(message) = self.match_errors(&login.error, &base, &result)? {
            return Err(LoginError::Rejected {
                site: self.definition.id.clone(),
                message,
            }
            .into());
        }

        if !self.verify(login, Some(&result)).await? {
            return Err(LoginError::VerificationFailed {
                site: self.definition.id.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Renders the login inputs against the site configuration
    ///
    /// Every `.Config.<key>` a template references must be configured and
    /// non-blank.
    fn login_inputs(&self, login: &LoginBlock) -> Result<Vec<(String, String)>, TrawlError> {
        let mut vars = TemplateVars::new();
        vars.set_all("Config", &self.site_config.settings);

        let mut inputs = Vec::with_capacity(login.inputs.len());
        for (name, template) in &login.inputs {
            for variable in variables(template) {
                if let Some(key) = variable.strip_prefix("Config.") {
                    let present = self
                        .site_config
                        .get(key)
                        .is_some_and(|value| !value.trim().is_empty());
                    if !present {
                        return Err(LoginError::MissingCredential {
                            site: self.definition.id.clone(),
                            key: key.to_string(),
                        }
                        .into());
                    }
                }
            }
            let value = render(template, &vars).map_err(LoginError::from)?;
            inputs.push((name.clone(), value));
        }
        Ok(inputs)
    }

    /// Returns the error text of the first matching error pattern
    fn match_errors(
        &self,
        patterns: &[ErrorBlock],
        base: &Url,
        result: &FetchResult,
    ) -> Result<Option<String>, TrawlError> {
        let html = result.html().unwrap_or_default();
        let content_error = |message: String| FetchError::Content {
            url: result.url().to_string(),
            message,
        };

        for pattern in patterns {
            let path_hit = match &pattern.path {
                Some(path) => result.url().path() == base.join(path)?.path(),
                None => false,
            };
            let selector_hit = match &pattern.selector {
                Some(selector) => has_match(html, selector).map_err(content_error)?,
                None => false,
            };
            if !path_hit && !selector_hit {
                continue;
            }

            let message_selector = pattern.message.as_ref().or(pattern.selector.as_ref());
            let message = match message_selector {
                Some(selector) => select_text(html, selector).map_err(content_error)?,
                None => None,
            };
            return Ok(Some(
                message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "login failed".to_string()),
            ));
        }
        Ok(None)
    }

    /// Checks the login against the definition's test block
    ///
    /// Fetches the test page when one is configured (otherwise inspects `result`,
    /// or the base page when there is no result) and looks for the test selector.
    /// No test block means success.
    async fn verify(
        &mut self,
        login: &LoginBlock,
        result: Option<&FetchResult>,
    ) -> Result<bool, TrawlError> {
        let Some(test) = &login.test else {
            return Ok(true);
        };
        let TestBlock { path, selector } = test;
        let base = self.base_url()?.clone();

        let fetched;
        let page = match (path, result) {
            (Some(path), _) => {
                fetched = self.fetch(&RequestOptions::get(base.join(path)?)).await?;
                &fetched
            }
            (None, Some(result)) => result,
            (None, None) => {
                fetched = self.fetch(&RequestOptions::get(base)).await?;
                &fetched
            }
        };

        if !page.is_success() {
            return Ok(false);
        }
        match selector {
            Some(selector) => {
                let html = page.html().unwrap_or_default();
                has_match(html, selector).map_err(|message| {
                    TrawlError::from(FetchError::Content {
                        url: page.url().to_string(),
                        message,
                    })
                })
            }
            None => Ok(true),
        }
    }

    /// Invalidates the base URL after a failed fetch, so the next setup re-probes it
    ///
    /// Network failures, non-OK statuses and unparseable content all count.
    pub fn note_failure(&self, error: &TrawlError) {
        if !error.is_fetch_error() {
            return;
        }
        if let Some(base) = &self.base_url {
            tracing::debug!("{} invalidating {}: {}", self.definition.id, base, error);
            self.connectivity.invalidate(base.as_str());
        }
    }

    /// Like [`Self::fetch`], but a non-OK status is an error
    pub async fn fetch_success(&self, request: &RequestOptions) -> Result<FetchResult, TrawlError> {
        self.fetch(request)
            .await?
            .ensure_success()
            .map_err(TrawlError::from)
            .inspect_err(|e| self.note_failure(e))
    }

    /// Fetches through the session's cookie jar, pacing requests to the host
    pub async fn fetch(&self, request: &RequestOptions) -> Result<FetchResult, TrawlError> {
        self.pacer
            .wait(request.url.host_str().unwrap_or_default())
            .await;
        self.fetcher
            .fetch(request)
            .await
            .map_err(TrawlError::from)
            .inspect_err(|e| self.note_failure(e))
    }

    /// Like [`Self::fetch`], without decoding the body
    pub async fn fetch_raw(&self, request: &RequestOptions) -> Result<RawResponse, TrawlError> {
        self.pacer
            .wait(request.url.host_str().unwrap_or_default())
            .await;
        self.fetcher
            .fetch_raw(request)
            .await
            .map_err(TrawlError::from)
            .inspect_err(|e| self.note_failure(e))
    }
}

impl std::fmt::Debug for BrowsingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingSession")
            .field("site", &self.definition.id)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .finish()
    }
}
