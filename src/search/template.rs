//! Placeholder expansion for definition templates
//!
//! Definitions reference runtime values with `{{ .Name }}` placeholders, where the
//! name may be dotted (`{{ .Config.username }}`, `{{ .Result.title }}`). Expansion is
//! strict: a placeholder naming an unknown variable is an error.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while expanding a template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unknown template variable '.{name}' in \"{template}\"")]
    UnknownVariable { name: String, template: String },

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(String),
}

static PLACEHOLDER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn placeholder() -> Result<&'static Regex, TemplateError> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}"))
        .as_ref()
        .map_err(|e| TemplateError::Pattern(e.to_string()))
}

/// Named values available to templates
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Adds every pair of `values` under `<prefix>.<key>`
    pub fn set_all<'a, I>(&mut self, prefix: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in values {
            self.values
                .insert(format!("{}.{}", prefix, key), value.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Expands every placeholder in `template`
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let pattern = placeholder()?;
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in pattern.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| TemplateError::UnknownVariable {
                name: name.as_str().to_string(),
                template: template.to_string(),
            })?;
        output.push_str(&template[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}

/// Names of the variables a template references, in order of appearance
pub fn variables(template: &str) -> Vec<String> {
    match placeholder() {
        Ok(pattern) => pattern
            .captures_iter(template)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}
