use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Main configuration structure for Sumi-Trawl
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub definitions: DefinitionsConfig,
    /// Per-site settings keyed by definition name
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

impl Config {
    /// Returns the settings for a site, or an empty set when none are configured
    pub fn site(&self, name: &str) -> SiteConfig {
        self.sites.get(name).cloned().unwrap_or_default()
    }
}

/// Search runtime behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker tasks in the worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the worker pool job queue
    #[serde(rename = "job-queue-size", default = "default_job_queue_size")]
    pub job_queue_size: usize,

    /// Capacity of the worker pool results queue
    #[serde(rename = "result-queue-size", default = "default_result_queue_size")]
    pub result_queue_size: usize,

    /// Keep logged-in sessions alive between searches
    #[serde(rename = "keep-sessions", default = "default_true")]
    pub keep_sessions: bool,

    /// Number of independently logged-in sessions per site
    #[serde(rename = "sessions-per-site", default = "default_sessions_per_site")]
    pub sessions_per_site: usize,

    /// Persist rows that were filtered out by category or series checks
    #[serde(rename = "persist-filtered", default)]
    pub persist_filtered: bool,

    /// Maximum number of child searches an aggregate runs at once
    #[serde(rename = "max-parallel-searches", default = "default_max_parallel")]
    pub max_parallel_searches: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            job_queue_size: default_job_queue_size(),
            result_queue_size: default_result_queue_size(),
            keep_sessions: true,
            sessions_per_site: default_sessions_per_site(),
            persist_filtered: false,
            max_parallel_searches: default_max_parallel(),
        }
    }
}

/// Connectivity cache sizing
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// Maximum number of URLs remembered
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// How long a probe result stays valid (minutes)
    #[serde(rename = "ttl-minutes", default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Overall per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connect/handshake timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SOCKS proxy address, e.g. `socks5://127.0.0.1:9050`
    #[serde(default)]
    pub proxy: Option<String>,

    /// Accept invalid TLS certificates
    #[serde(rename = "skip-tls-verify", default)]
    pub skip_tls_verify: bool,

    /// Directory receiving a dump of every request and response
    #[serde(rename = "dump-dir", default)]
    pub dump_dir: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            proxy: None,
            skip_tls_verify: false,
            dump_dir: None,
        }
    }
}

/// Result storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Field names forming the uniqueness key of a stored result
    #[serde(default)]
    pub key: Option<Vec<String>>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            key: None,
        }
    }
}

/// Where site definitions are loaded from
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionsConfig {
    /// Directory holding one `<name>.toml` definition per site
    #[serde(default = "default_definitions_dir")]
    pub directory: String,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            directory: default_definitions_dir(),
        }
    }
}

/// Settings for one site (base URL override and credentials)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteConfig {
    /// Overrides the definition's candidate links
    #[serde(default)]
    pub url: Option<String>,

    /// Free-form values such as `username`, `password` or `cookie`
    #[serde(flatten)]
    pub settings: BTreeMap<String, String>,
}

impl SiteConfig {
    /// Looks up a setting value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

fn default_workers() -> usize {
    4
}

fn default_job_queue_size() -> usize {
    16
}

fn default_result_queue_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_sessions_per_site() -> usize {
    1
}

fn default_max_parallel() -> usize {
    8
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_ttl_minutes() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("sumi-trawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_database_path() -> String {
    "./trawl.db".to_string()
}

fn default_definitions_dir() -> String {
    "./definitions".to_string()
}
