use crate::cache::OptimisticConnectivityCache;
use crate::config::Config;
use crate::crawler::{FetcherFactory, HttpFetcherFactory};
use crate::indexer::{
    Aggregate, DefinitionSource, DirectorySource, Indexer, NoopEnricher, QueryEnricher, Runner,
};
use crate::storage::{open_storage, Storage};
use crate::TrawlError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Owns the indexers built from one configuration
///
/// Runners are built on first use and cached by name, so every caller in the
/// scope shares one session pool per site.
pub struct IndexerScope {
    config: Config,
    source: Arc<dyn DefinitionSource>,
    factory: Arc<dyn FetcherFactory>,
    connectivity: Arc<OptimisticConnectivityCache>,
    storage: Option<Arc<dyn Storage>>,
    enricher: Arc<dyn QueryEnricher>,
    runners: RwLock<HashMap<String, Arc<Runner>>>,
}

impl IndexerScope {
    /// Creates a scope without storage
    ///
    /// # Errors
    ///
    /// Fails if the probe fetcher cannot be built or the connectivity settings are
    /// invalid.
    pub fn new(
        config: Config,
        source: Arc<dyn DefinitionSource>,
        factory: Arc<dyn FetcherFactory>,
    ) -> Result<Self, TrawlError> {
        let probe = factory.create()?;
        let connectivity = Arc::new(OptimisticConnectivityCache::new(
            &config.connectivity,
            probe,
        )?);

        Ok(Self {
            config,
            source,
            factory,
            connectivity,
            storage: None,
            enricher: Arc::new(NoopEnricher),
            runners: RwLock::new(HashMap::new()),
        })
    }

    /// Creates the scope a configuration describes: definitions from its
    /// directory, HTTP transport and SQLite storage
    pub fn from_config(config: Config) -> Result<Self, TrawlError> {
        let source = Arc::new(DirectorySource::new(&config.definitions.directory));
        let factory = Arc::new(HttpFetcherFactory::new(config.transport.clone()));
        let storage = open_storage(&config.storage)?;
        Ok(Self::new(config, source, factory)?.with_storage(storage))
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn QueryEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.storage.clone()
    }

    /// Definition names matching a selector (`None`, `"all"` or `"a,b"`)
    pub fn names(&self, selector: Option<&str>) -> Result<Vec<String>, TrawlError> {
        Ok(self.source.list(selector)?)
    }

    /// Returns the runner for a definition, building it on first use
    pub fn get(&self, name: &str) -> Result<Arc<Runner>, TrawlError> {
        {
            let runners = self.runners.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(runner) = runners.get(name) {
                return Ok(Arc::clone(runner));
            }
        }

        let definition = self.source.load(name)?;
        let mut runner = Runner::new(
            definition,
            self.config.site(name),
            &self.config.runtime,
            Arc::clone(&self.factory),
            Arc::clone(&self.connectivity),
        )
        .with_enricher(Arc::clone(&self.enricher));
        if let Some(storage) = &self.storage {
            runner = runner.with_storage(Arc::clone(storage));
        }
        tracing::debug!("Built indexer {}", name);

        let mut runners = self.runners.write().unwrap_or_else(PoisonError::into_inner);
        let runner = runners
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(runner));
        Ok(Arc::clone(runner))
    }

    /// Runners for every definition matching a selector
    pub fn lookup(&self, selector: Option<&str>) -> Result<Vec<Arc<dyn Indexer>>, TrawlError> {
        self.names(selector)?
            .iter()
            .map(|name| self.get(name).map(|runner| runner as Arc<dyn Indexer>))
            .collect()
    }

    /// An aggregate over every definition matching a selector
    pub fn aggregate(&self, selector: Option<&str>) -> Result<Aggregate, TrawlError> {
        let id = selector.unwrap_or("all").trim().to_string();
        Aggregate::new(
            id,
            self.lookup(selector)?,
            self.config.runtime.max_parallel_searches,
        )
    }
}
