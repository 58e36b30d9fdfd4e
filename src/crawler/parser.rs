//! Row and field extraction
//!
//! This module turns fetched pages into raw field values:
//! - Selecting result rows from HTML (CSS selectors) or JSON (dotted paths)
//! - Merging continuation rows and dropping excluded rows
//! - Extracting per-field text or attribute values
//! - Reading login forms and probing for marker elements
//!
//! Parsed HTML documents are not `Send`, so every function here parses and
//! finishes synchronously.

use crate::indexer::{FieldBlock, RowsBlock};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Raw values of one extracted row, keyed by field name
pub type RowValues = BTreeMap<String, String>;

/// A form found on a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlForm {
    pub action: Option<String>,
    pub method: String,
    /// Named controls with their current values, in document order
    pub inputs: Vec<(String, String)>,
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector '{}': {:?}", selector, e))
}

/// Collapses runs of whitespace in an element's text
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts rows from an HTML page
///
/// Rows matching `rows.remove` are dropped first; then every row is merged with
/// the `rows.after` rows following it. Fields with only a `text` template are
/// left for the caller to compute.
///
/// # Errors
///
/// Returns an error if the row or remove selector is invalid. A field that fails
/// to extract is logged and skipped.
pub fn extract_html_rows(
    html: &str,
    rows: &RowsBlock,
    fields: &BTreeMap<String, FieldBlock>,
) -> Result<Vec<RowValues>, String> {
    let document = Html::parse_document(html);
    let row_selector = parse_selector(&rows.selector)?;
    let remove = rows.remove.as_deref().map(parse_selector).transpose()?;

    let selected: Vec<ElementRef<'_>> = document
        .select(&row_selector)
        .filter(|row| match &remove {
            Some(remove) => !remove.matches(row) && row.select(remove).next().is_none(),
            None => true,
        })
        .collect();

    let field_selectors: Vec<(&String, &FieldBlock, Selector)> = fields
        .iter()
        .filter_map(|(name, field)| {
            let selector = field.selector.as_deref()?;
            match parse_selector(selector) {
                Ok(parsed) => Some((name, field, parsed)),
                Err(e) => {
                    tracing::warn!("Skipping field '{}': {}", name, e);
                    None
                }
            }
        })
        .collect();

    let mut results = Vec::new();
    for group in selected.chunks(rows.after + 1) {
        let mut values = RowValues::new();
        for (name, field, selector) in &field_selectors {
            let found = group
                .iter()
                .find_map(|row| row.select(selector).next());
            let value = found.and_then(|element| match &field.attribute {
                Some(attribute) => element.value().attr(attribute).map(str::to_string),
                None => Some(element_text(&element)),
            });
            match value {
                Some(value) => {
                    values.insert((*name).clone(), value);
                }
                None if field.optional => {}
                None => tracing::warn!("Field '{}' not found in row", name),
            }
        }
        results.push(values);
    }

    Ok(results)
}

/// Converts a dotted path (`data.items.0`) to a JSON pointer
fn to_pointer(path: &str) -> String {
    let path = path.trim().trim_start_matches('.');
    if path.is_empty() {
        return String::new();
    }
    path.split('.')
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}

/// Looks up a dotted path in a JSON value
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    value.pointer(&to_pointer(path))
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(json_scalar).collect();
            Some(parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Extracts rows from a JSON document
///
/// `rows.selector` is the dotted path to an array; field selectors are dotted
/// paths relative to each element. A missing row path yields no rows.
pub fn extract_json_rows(
    value: &Value,
    rows: &RowsBlock,
    fields: &BTreeMap<String, FieldBlock>,
) -> Result<Vec<RowValues>, String> {
    let items = match json_path(value, &rows.selector) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(format!(
                "rows path '{}' is not an array: {}",
                rows.selector, other
            ))
        }
    };

    let mut results = Vec::with_capacity(items.len());
    for group in items.chunks(rows.after + 1) {
        let mut values = RowValues::new();
        for (name, field) in fields {
            let Some(path) = field.selector.as_deref() else {
                continue;
            };
            match group
                .iter()
                .find_map(|item| json_path(item, path).and_then(json_scalar))
            {
                Some(value) => {
                    values.insert(name.clone(), value);
                }
                None if field.optional => {}
                None => tracing::warn!("Field '{}' not found in JSON row", name),
            }
        }
        results.push(values);
    }

    Ok(results)
}

/// Text of the first element matching `selector`
pub fn select_text(html: &str, selector: &str) -> Result<Option<String>, String> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let text = document.select(&selector).next().map(|e| element_text(&e));
    Ok(text)
}

/// Whether any element matches `selector`
pub fn has_match(html: &str, selector: &str) -> Result<bool, String> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// Reads the first form matching `selector`
///
/// Collects named `input`, `select` and `textarea` controls. Unchecked
/// checkboxes and radios are left out, as are submit buttons.
pub fn find_form(html: &str, selector: &str) -> Result<Option<HtmlForm>, String> {
    let form_selector = parse_selector(selector)?;
    let control_selector = parse_selector("input[name], select[name], textarea[name]")?;
    let option_selector = parse_selector("option")?;
    let document = Html::parse_document(html);

    let Some(form) = document.select(&form_selector).next() else {
        return Ok(None);
    };

    let mut inputs = Vec::new();
    for control in form.select(&control_selector) {
        let element = control.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        let value = match element.name() {
            "select" => {
                let options: Vec<ElementRef<'_>> = control.select(&option_selector).collect();
                options
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| options.first())
                    .map(|o| {
                        o.value()
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| element_text(o))
                    })
                    .unwrap_or_default()
            }
            "textarea" => control.text().collect(),
            _ => {
                let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => continue,
                    "checkbox" | "radio" if element.attr("checked").is_none() => continue,
                    _ => element.attr("value").unwrap_or_default().to_string(),
                }
            }
        };
        inputs.push((name.to_string(), value));
    }

    Ok(Some(HtmlForm {
        action: form.value().attr("action").map(str::to_string),
        method: form
            .value()
            .attr("method")
            .unwrap_or("post")
            .to_ascii_lowercase(),
        inputs,
    }))
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
///
/// Magnet links are kept as-is.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    if href.starts_with("magnet:") {
        return Some(href.to_string());
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}
