//! Sumi-Trawl: a declarative multi-site search aggregator
//!
//! Every target site is described by a definition file (login rules, search path,
//! row and field selectors). A generic runtime logs into those sites, walks their
//! result pages concurrently, classifies each result as new, updated or stale
//! against storage, and merges per-site results into one ordered stream.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod indexer;
pub mod search;
pub mod session;
pub mod state;
pub mod storage;
pub mod watch;

use thiserror::Error;

/// Main error type for Sumi-Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Login error: {0}")]
    Login(#[from] session::LoginError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Definition error: {0}")]
    Definition(#[from] indexer::DefinitionError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Template error: {0}")]
    Template(#[from] search::TemplateError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid range field '{field}': {message}")]
    InvalidRange { field: String, message: String },

    #[error("No reachable URL for site {site}")]
    Unreachable { site: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Unknown indexer: {0}")]
    UnknownIndexer(String),

    #[error("Duplicate indexer id: {0}")]
    DuplicateIndexer(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrawlError {
    /// Returns true for authentication failures.
    ///
    /// Login errors are fatal to the current search and stop watch loops; every
    /// other error is treated as transient by callers.
    pub fn is_login_error(&self) -> bool {
        matches!(self, Self::Login(_))
    }

    /// Returns true for network, status or content failures while fetching
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Unreachable { .. })
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sumi-Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use indexer::{Aggregate, Indexer, IndexerScope, Runner};
pub use search::{Query, ResultItem, SearchContext};
pub use state::LoginState;
