//! Search result items

use crate::storage::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One result extracted from a site
///
/// Created by field extraction. The staleness flags and `uuid` are filled in once,
/// after the storage lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Id of the indexer that produced the item
    pub site: String,
    pub title: String,
    pub description: Option<String>,
    /// Download link
    pub link: Option<String>,
    /// Details page
    pub details: Option<String>,
    /// Site-local category id
    pub category: Option<String>,
    /// Global category names the local category maps to
    #[serde(default)]
    pub categories: Vec<String>,
    /// Size in bytes
    pub size: Option<u64>,
    pub seeders: Option<u32>,
    pub leechers: Option<u32>,
    pub published: Option<String>,
    pub series_title: Option<String>,
    /// Extracted fields with no dedicated slot
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// Normalized title used for dedup
    pub fingerprint: String,
    /// Site-local id
    pub local_id: Option<String>,
    /// Identifier assigned on first persistence
    pub uuid: Option<String>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_update: bool,
}

impl ResultItem {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            ..Default::default()
        }
    }

    /// Stores an extracted field value in its slot
    ///
    /// Numeric fields that fail to parse are kept in `extra` under their own name.
    pub fn set_field(&mut self, name: &str, value: &str) {
        let value = value.trim();
        match name {
            "title" => self.title = value.to_string(),
            "description" => self.description = Some(value.to_string()),
            "download" | "link" => self.link = Some(value.to_string()),
            "details" | "comments" => self.details = Some(value.to_string()),
            "category" => self.category = Some(value.to_string()),
            "date" | "published" => self.published = Some(value.to_string()),
            "series" | "series_title" => self.series_title = Some(value.to_string()),
            "id" | "local_id" => self.local_id = Some(value.to_string()),
            "size" => match parse_size(value) {
                Some(size) => self.size = Some(size),
                None => {
                    self.extra.insert(name.to_string(), value.to_string());
                }
            },
            "seeders" | "leechers" => match parse_count(value) {
                Some(count) if name == "seeders" => self.seeders = Some(count),
                Some(count) => self.leechers = Some(count),
                None => {
                    self.extra.insert(name.to_string(), value.to_string());
                }
            },
            _ => {
                self.extra.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Looks up a field by the names accepted by [`set_field`](Self::set_field)
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "site" => Some(self.site.clone()),
            "title" => Some(self.title.clone()),
            "description" => self.description.clone(),
            "download" | "link" => self.link.clone(),
            "details" | "comments" => self.details.clone(),
            "category" => self.category.clone(),
            "date" | "published" => self.published.clone(),
            "series" | "series_title" => self.series_title.clone(),
            "id" | "local_id" => self.local_id.clone(),
            "size" => self.size.map(|s| s.to_string()),
            "seeders" => self.seeders.map(|s| s.to_string()),
            "leechers" => self.leechers.map(|s| s.to_string()),
            "fingerprint" => Some(self.fingerprint.clone()),
            "uuid" => self.uuid.clone(),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Recomputes the fingerprint from the title
    pub fn compute_fingerprint(&mut self) {
        self.fingerprint = fingerprint(&self.title);
    }

    /// Seen before and unchanged
    pub fn is_stale(&self) -> bool {
        !self.is_new && !self.is_update
    }
}

impl KeyValue for ResultItem {
    fn key_value(&self, field: &str) -> Option<String> {
        self.field(field)
    }
}

/// Normalizes a title so cosmetic differences do not defeat dedup
///
/// Lowercases, turns separators and punctuation into spaces and collapses runs of
/// whitespace: `"Some.Show_S01E02 [1080p]"` becomes `"some show s01e02 1080p"`.
pub fn fingerprint(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses sizes such as `"1.5 GB"`, `"700MiB"` or `"1024"` into bytes
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim().replace(',', "");
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" | "bytes" => 1.0,
        "kb" | "kib" | "k" => 1024.0,
        "mb" | "mib" | "m" => 1024.0 * 1024.0,
        "gb" | "gib" | "g" => 1024.0 * 1024.0 * 1024.0,
        "tb" | "tib" | "t" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };

    Some((number * multiplier).round() as u64)
}

fn parse_count(text: &str) -> Option<u32> {
    text.trim().replace(',', "").parse().ok()
}
