//! Declarative site definitions
//!
//! One TOML file describes one site: candidate base URLs, login rules, the search
//! request and the selectors that turn result pages into items.
//!
//! ```toml
//! id = "demo"
//! links = ["https://demo.example.com/"]
//! rate-limit-ms = 500
//!
//! [categories]
//! "1" = "Movies"
//!
//! [login]
//! method = "form"
//! path = "/login.php"
//! inputs = { username = "{{ .Config.username }}", password = "{{ .Config.password }}" }
//! test = { path = "/index.php", selector = "a.logout" }
//!
//! [search]
//! path = "/browse.php"
//! inputs = { q = "{{ .Keywords }}", page = "{{ .Page }}" }
//! rows = { selector = "table.results tr.row" }
//!
//! [search.fields.title]
//! selector = "a.title"
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors raised while loading definitions
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse definition {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Definition not found: {0}")]
    NotFound(String),

    #[error("Invalid definition {name}: {message}")]
    Invalid { name: String, message: String },
}

/// Description of one target site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Candidate base URLs, tried in order
    pub links: Vec<String>,
    /// Minimum delay between requests to the site
    #[serde(default)]
    pub rate_limit_ms: u64,
    /// Local category id to global category name
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub login: Option<LoginBlock>,
    pub search: SearchBlock,
}

/// How a session authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    /// Fetch the login page, fill the form and submit it
    Form,
    /// Post the inputs directly
    Post,
    /// Inject a configured cookie
    Cookie,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoginBlock {
    pub method: LoginMethod,
    /// Login page (form) or endpoint (post), relative to the base URL
    #[serde(default)]
    pub path: String,
    /// Selector of the login form
    #[serde(default)]
    pub form: Option<String>,
    /// Overrides the form's action
    #[serde(default)]
    pub submit_path: Option<String>,
    /// Priming request issued before logging in
    #[serde(default)]
    pub init: Option<String>,
    /// Input name to value template
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Patterns that mark a failed login
    #[serde(default)]
    pub error: Vec<ErrorBlock>,
    /// Probe verifying a login
    #[serde(default)]
    pub test: Option<TestBlock>,
}

/// A login failure pattern
///
/// Matches when the response landed on `path` or contains `selector`. The error
/// text is taken from `message` (a selector) or from `selector` itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBlock {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Login verification: an optional page to fetch and a selector that must be present
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestBlock {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchBlock {
    pub path: String,
    #[serde(default)]
    pub method: SearchMethod,
    /// Request parameter name to value template
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    /// Upper bound on pages walked per query
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// The site returns everything on one page
    #[serde(default)]
    pub single_page: bool,
    /// Stop walking once a page yields an already-known item
    #[serde(default)]
    pub stop_on_stale: bool,
    pub rows: RowsBlock,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldBlock>,
}

/// Row selection
///
/// For HTML results `selector` is a CSS selector; for JSON results it is a dotted
/// path to an array.
#[derive(Debug, Clone, Deserialize)]
pub struct RowsBlock {
    pub selector: String,
    /// Number of following rows that belong to the same item
    #[serde(default)]
    pub after: usize,
    /// Rows matching this selector are dropped
    #[serde(default)]
    pub remove: Option<String>,
}

/// Extraction rule for one field
///
/// A field has either a `selector` (CSS or dotted JSON path, optionally reading
/// `attribute`) or a `text` template computed from other fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldBlock {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Missing values are not logged
    #[serde(default)]
    pub optional: bool,
}

fn default_start_page() -> u32 {
    1
}

impl SiteDefinition {
    /// Parses and validates a TOML definition
    pub fn from_toml(name: &str, text: &str) -> Result<Self, DefinitionError> {
        let definition: SiteDefinition =
            toml::from_str(text).map_err(|source| DefinitionError::Parse {
                name: name.to_string(),
                source,
            })?;
        definition.validate()?;
        Ok(definition)
    }

    fn invalid(&self, message: impl Into<String>) -> DefinitionError {
        DefinitionError::Invalid {
            name: self.id.clone(),
            message: message.into(),
        }
    }

    /// Checks the invariants the runtime relies on
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("id cannot be empty"));
        }
        if self.links.is_empty() {
            return Err(self.invalid("at least one link is required"));
        }
        for link in &self.links {
            Url::parse(link).map_err(|e| self.invalid(format!("bad link '{}': {}", link, e)))?;
        }
        if self.search.rows.selector.trim().is_empty() {
            return Err(self.invalid("search rows selector cannot be empty"));
        }
        if !self.search.fields.contains_key("title") {
            return Err(self.invalid("a title field is required"));
        }
        for (name, field) in &self.search.fields {
            if field.selector.is_none() && field.text.is_none() {
                return Err(self.invalid(format!("field '{}' needs a selector or text", name)));
            }
        }
        if self.search.start_page == 0 {
            return Err(self.invalid("start-page must be at least 1"));
        }
        if let Some(login) = &self.login {
            if login.method != LoginMethod::Cookie && login.path.is_empty() {
                return Err(self.invalid("login path is required"));
            }
        }
        Ok(())
    }

    pub fn has_login(&self) -> bool {
        self.login.is_some()
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Where definitions come from
pub trait DefinitionSource: Send + Sync {
    /// Loads one definition by name
    fn load(&self, name: &str) -> Result<SiteDefinition, DefinitionError>;

    /// Names matching a selector
    ///
    /// `None` and `"all"` select every definition; otherwise the selector is a
    /// comma-separated list of names, each of which must exist.
    fn list(&self, selector: Option<&str>) -> Result<Vec<String>, DefinitionError>;
}

/// Applies a name selector to the available names
fn select_names(available: Vec<String>, selector: Option<&str>) -> Result<Vec<String>, DefinitionError> {
    match selector.map(str::trim) {
        None | Some("") | Some("all") => Ok(available),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                if available.iter().any(|a| a == name) {
                    Ok(name.to_string())
                } else {
                    Err(DefinitionError::NotFound(name.to_string()))
                }
            })
            .collect(),
    }
}

/// Loads `<name>.toml` files from a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    directory: PathBuf,
}

impl DirectorySource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl DefinitionSource for DirectorySource {
    fn load(&self, name: &str) -> Result<SiteDefinition, DefinitionError> {
        let path = self.directory.join(format!("{}.toml", name));
        if !path.is_file() {
            return Err(DefinitionError::NotFound(name.to_string()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| DefinitionError::Io {
            path: path.clone(),
            source,
        })?;
        SiteDefinition::from_toml(name, &text)
    }

    fn list(&self, selector: Option<&str>) -> Result<Vec<String>, DefinitionError> {
        let entries = std::fs::read_dir(&self.directory).map_err(|source| DefinitionError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| DefinitionError::Io {
                    path: self.directory.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();

        select_names(names, selector)
    }
}

/// Definitions held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    definitions: HashMap<String, SiteDefinition>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: SiteDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }
}

impl DefinitionSource for MemorySource {
    fn load(&self, name: &str) -> Result<SiteDefinition, DefinitionError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| DefinitionError::NotFound(name.to_string()))
    }

    fn list(&self, selector: Option<&str>) -> Result<Vec<String>, DefinitionError> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        select_names(names, selector)
    }
}
