//! Definition-driven indexer
//!
//! A [`Runner`] executes one [`SiteDefinition`]: it logs in through a session
//! pool, expands the search templates, extracts rows and fields from the result
//! page and classifies every item against storage.

use crate::cache::OptimisticConnectivityCache;
use crate::config::{RuntimeConfig, SiteConfig};
use crate::crawler::parser::{extract_html_rows, extract_json_rows, resolve_link, RowValues};
use crate::crawler::{FetchError, FetchResult, FetcherFactory, RequestOptions};
use crate::indexer::{
    Capabilities, CategoryMap, Download, Indexer, SearchMethod, SearchOutcome, SiteDefinition,
};
use crate::search::template::{render, TemplateVars};
use crate::search::{fingerprint, Query, ResultItem, SearchContext};
use crate::session::{SessionMultiplexer, SessionTemplate, DEFAULT_VERIFY_INTERVAL};
use crate::state::DomainPacer;
use crate::storage::{Storage, StorageError};
use crate::TrawlError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Best-effort query enrichment, e.g. resolving series identifiers
///
/// Failures are logged and the original query is used.
#[async_trait]
pub trait QueryEnricher: Send + Sync {
    async fn enrich(&self, query: &Query) -> anyhow::Result<Query>;
}

/// Leaves queries untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

#[async_trait]
impl QueryEnricher for NoopEnricher {
    async fn enrich(&self, query: &Query) -> anyhow::Result<Query> {
        Ok(query.clone())
    }
}

/// Indexer backed by a site definition
pub struct Runner {
    definition: Arc<SiteDefinition>,
    template: SessionTemplate,
    categories: CategoryMap,
    keep_sessions: bool,
    sessions_per_site: usize,
    persist_filtered: bool,
    storage: Option<Arc<dyn Storage>>,
    enricher: Arc<dyn QueryEnricher>,
    kept: Mutex<Option<Arc<SessionMultiplexer>>>,
}

impl Runner {
    pub fn new(
        definition: SiteDefinition,
        site_config: SiteConfig,
        runtime: &RuntimeConfig,
        factory: Arc<dyn FetcherFactory>,
        connectivity: Arc<OptimisticConnectivityCache>,
    ) -> Self {
        let pacer = Arc::new(DomainPacer::new(Duration::from_millis(
            definition.rate_limit_ms,
        )));
        let categories = CategoryMap::new(definition.categories.clone());
        let definition = Arc::new(definition);

        Self {
            template: SessionTemplate {
                definition: Arc::clone(&definition),
                site_config: Arc::new(site_config),
                factory,
                connectivity,
                pacer,
                verify_interval: DEFAULT_VERIFY_INTERVAL,
            },
            definition,
            categories,
            keep_sessions: runtime.keep_sessions,
            sessions_per_site: runtime.sessions_per_site,
            persist_filtered: runtime.persist_filtered,
            storage: None,
            enricher: Arc::new(NoopEnricher),
            kept: Mutex::new(None),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn QueryEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_verify_interval(mut self, interval: Duration) -> Self {
        self.template.verify_interval = interval;
        self
    }

    pub fn definition(&self) -> &SiteDefinition {
        &self.definition
    }

    /// Returns the session pool for one call
    ///
    /// With `keep-sessions` the pool is built once and reused; otherwise every call
    /// gets a fresh single-session pool that is dropped with the call.
    async fn sessions(&self) -> Result<Arc<SessionMultiplexer>, TrawlError> {
        if !self.keep_sessions {
            let pool = SessionMultiplexer::new(1, self.template.clone()).await?;
            return Ok(Arc::new(pool));
        }

        let mut kept = self.kept.lock().await;
        if let Some(pool) = kept.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(
            SessionMultiplexer::new(self.sessions_per_site, self.template.clone()).await?,
        );
        *kept = Some(Arc::clone(&pool));
        Ok(pool)
    }

    async fn enrich(&self, query: &Query) -> Query {
        match self.enricher.enrich(query).await {
            Ok(enriched) => enriched,
            Err(e) => {
                tracing::warn!("Query enrichment failed for {}: {:#}", self.definition.id, e);
                query.clone()
            }
        }
    }

    fn template_vars(
        &self,
        query: &Query,
        context: &SearchContext,
        local_categories: &[String],
    ) -> TemplateVars {
        let optional = |value: Option<u32>| value.map(|v| v.to_string()).unwrap_or_default();

        let mut vars = TemplateVars::new();
        vars.set("Keywords", query.search_keywords())
            .set("Query.Keywords", query.keywords.clone())
            .set("Query.Series", query.series.clone().unwrap_or_default())
            .set("Query.Season", optional(query.season))
            .set("Query.Episode", optional(query.episode))
            .set("Categories", local_categories.join(","))
            .set("Page", context.page.to_string())
            .set("StartIndex", context.start_index.to_string())
            .set_all("Query", &query.fields)
            .set_all("Query", &context.fields)
            .set_all("Config", &self.template.site_config.settings);
        vars
    }

    /// Expands the search path and inputs into a request
    ///
    /// Range-field values not referenced by an input are sent under their own
    /// name.
    fn search_request(
        &self,
        base: &Url,
        vars: &TemplateVars,
        context: &SearchContext,
    ) -> Result<RequestOptions, TrawlError> {
        let search = &self.definition.search;
        let mut url = base.join(&render(&search.path, vars)?)?;

        let mut inputs = Vec::with_capacity(search.inputs.len() + context.fields.len());
        for (name, template) in &search.inputs {
            inputs.push((name.clone(), render(template, vars)?));
        }
        for (name, value) in &context.fields {
            if !search.inputs.contains_key(name) {
                inputs.push((name.clone(), value.clone()));
            }
        }

        let request = match search.method {
            SearchMethod::Get => {
                if !inputs.is_empty() {
                    url.query_pairs_mut().extend_pairs(&inputs);
                }
                RequestOptions::get(url)
            }
            SearchMethod::Post => RequestOptions::post(url, inputs),
        };
        Ok(request.with_referer(base.as_str()))
    }

    /// Turns extracted row values into an item
    ///
    /// Returns `None` for rows without a title.
    fn build_item(&self, row: &RowValues, page_url: &Url) -> Option<ResultItem> {
        let mut item = ResultItem::new(self.definition.id.clone());
        for (name, value) in row {
            item.set_field(name, value);
        }

        let fields = &self.definition.search.fields;
        if fields.values().any(|f| f.text.is_some()) {
            let mut vars = TemplateVars::new();
            vars.set_all("Result", row);
            for (name, field) in fields {
                let Some(text) = &field.text else {
                    continue;
                };
                match render(text, &vars) {
                    Ok(value) => item.set_field(name, &value),
                    Err(e) => tracing::warn!("Skipping computed field '{}': {}", name, e),
                }
            }
        }

        if item.title.is_empty() {
            tracing::debug!("Skipping {} row without a title", self.definition.id);
            return None;
        }

        item.link = item.link.as_deref().and_then(|l| resolve_link(l, page_url));
        item.details = item
            .details
            .as_deref()
            .and_then(|l| resolve_link(l, page_url));
        item.categories = self.categories.global_for(item.category.as_deref());
        item.compute_fingerprint();
        Some(item)
    }

    /// Records the item in storage and sets its staleness flags
    ///
    /// Items whose key cannot be built are treated as new and not persisted.
    fn persist(&self, item: &mut ResultItem) -> Result<(), TrawlError> {
        let Some(storage) = &self.storage else {
            item.is_new = true;
            return Ok(());
        };

        match storage.add(item) {
            Ok(()) => Ok(()),
            Err(StorageError::MissingKeyField { field }) => {
                tracing::warn!(
                    "Not persisting '{}' from {}: missing key field '{}'",
                    item.title,
                    self.definition.id,
                    field
                );
                item.is_new = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Series queries only accept items of that series
fn series_matches(query: &Query, item: &ResultItem) -> bool {
    let Some(series) = &query.series else {
        return true;
    };
    let wanted = fingerprint(series);
    match &item.series_title {
        Some(title) => fingerprint(title) == wanted,
        None => fingerprint(&item.title).starts_with(&wanted),
    }
}

#[async_trait]
impl Indexer for Runner {
    fn id(&self) -> &str {
        &self.definition.id
    }

    async fn search(
        &self,
        query: &Query,
        context: Option<SearchContext>,
    ) -> Result<SearchOutcome, TrawlError> {
        let mut context = context.unwrap_or_default();
        if context.page == 0 {
            context.page = self.start_page();
        }

        let sessions = self.sessions().await?;
        let query = self.enrich(query).await;
        let lease = sessions.acquire().await?;

        let local_categories = self.categories.local_ids(&query.categories);
        if !query.categories.is_empty() && local_categories.is_empty() {
            tracing::debug!(
                "{} has no categories matching {:?}",
                self.definition.id,
                query.categories
            );
            return Ok(SearchOutcome {
                items: Vec::new(),
                context: context.advance(0),
            });
        }

        let base = lease.base_url()?.clone();
        let vars = self.template_vars(&query, &context, &local_categories);
        let request = self.search_request(&base, &vars, &context)?;
        tracing::debug!("{} searching page {}: {}", self.definition.id, context.page, request.url);
        let result = lease.fetch_success(&request).await?;

        let search = &self.definition.search;
        let rows = match &result {
            FetchResult::Html { body, .. } => extract_html_rows(body, &search.rows, &search.fields),
            FetchResult::Json { value, .. } => {
                extract_json_rows(value, &search.rows, &search.fields)
            }
        }
        .map_err(|message| {
            TrawlError::from(FetchError::Content {
                url: result.url().to_string(),
                message,
            })
        })
        .inspect_err(|e| lease.note_failure(e))?;
        drop(lease);

        let mut items = Vec::new();
        for row in &rows {
            if query.limit_reached(items.len()) {
                break;
            }
            let Some(mut item) = self.build_item(row, result.url()) else {
                continue;
            };

            let accepted = CategoryMap::accepts(&local_categories, item.category.as_deref())
                && series_matches(&query, &item);
            if !accepted {
                if self.persist_filtered {
                    self.persist(&mut item)?;
                }
                continue;
            }

            self.persist(&mut item)?;
            items.push(item);
        }

        tracing::debug!(
            "{} page {}: {} rows, {} results",
            self.definition.id,
            context.page,
            rows.len(),
            items.len()
        );
        let context = context.advance(items.len());
        Ok(SearchOutcome { items, context })
    }

    async fn open(&self, item: &ResultItem) -> Result<Download, TrawlError> {
        let link = item.link.as_deref().ok_or_else(|| FetchError::Content {
            url: item.details.clone().unwrap_or_default(),
            message: format!("'{}' has no download link", item.title),
        })?;

        if link.starts_with("magnet:") {
            return Ok(Download {
                url: link.to_string(),
                content_type: "text/uri-list".to_string(),
                body: link.as_bytes().to_vec(),
            });
        }

        let url = Url::parse(link)?;
        let sessions = self.sessions().await?;
        let lease = sessions.acquire().await?;
        let referer = lease.base_url()?.to_string();
        let raw = lease
            .fetch_raw(&RequestOptions::get(url).with_referer(referer))
            .await?;

        if !(200..300).contains(&raw.status) {
            return Err(FetchError::Status {
                url: raw.url.to_string(),
                status: raw.status,
            }
            .into());
        }
        Ok(Download {
            url: raw.url.to_string(),
            content_type: raw.content_type,
            body: raw.body,
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            categories: self.categories.global_names(),
            requires_login: self.definition.has_login(),
        }
    }

    fn max_search_pages(&self) -> Option<u32> {
        self.definition.search.max_pages
    }

    fn search_is_single_paged(&self) -> bool {
        self.definition.search.single_page
    }

    async fn check(&self) -> Result<(), TrawlError> {
        let sessions = self.sessions().await?;
        let lease = sessions.acquire().await?;
        let base = lease.base_url()?.clone();
        lease.fetch_success(&RequestOptions::get(base)).await?;
        tracing::info!("{} is healthy", self.definition.id);
        Ok(())
    }

    fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.storage.clone()
    }

    fn start_page(&self) -> u32 {
        self.definition.search.start_page
    }

    fn stop_on_stale(&self) -> bool {
        self.definition.search.stop_on_stale
    }
}
