//! Storage traits and error types
//!
//! This module defines the contract result stores implement, the key-extraction
//! interface records implement, and the associated error types.

use crate::search::ResultItem;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record has no value for key field '{field}'")]
    MissingKeyField { field: String },

    #[error("Storage is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Named-field lookup used to build uniqueness keys
pub trait KeyValue {
    /// Returns the value of `field`, or `None` when the record has no such field
    fn key_value(&self, field: &str) -> Option<String>;
}

/// Ordered list of field names forming a record's uniqueness key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    fields: Vec<String>,
}

impl IndexKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Builds the key string for a record
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingKeyField`] if any key field is absent or empty.
    pub fn value_for(&self, record: &dyn KeyValue) -> StorageResult<String> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match record.key_value(field) {
                Some(value) if !value.is_empty() => parts.push(value),
                _ => {
                    return Err(StorageError::MissingKeyField {
                        field: field.clone(),
                    })
                }
            }
        }
        Ok(parts.join("\u{1f}"))
    }
}

impl Default for IndexKey {
    /// Site plus fingerprint
    fn default() -> Self {
        Self::new(["site", "fingerprint"])
    }
}

/// Trait for result store implementations
///
/// Writes are at-least-once: adding a record is a create-or-update keyed by the
/// configured [`IndexKey`]. Implementations serialize their own writes.
pub trait Storage: Send + Sync {
    /// Looks up a stored record by key string
    fn find(&self, key: &str) -> StorageResult<Option<ResultItem>>;

    /// Creates or updates a record, then records the outcome on the item
    ///
    /// Sets `is_new` when the key was unknown and `is_update` when the stored
    /// content differed. Assigns `uuid` on first persistence and reuses the stored
    /// one afterwards.
    fn add(&self, item: &mut ResultItem) -> StorageResult<()>;

    /// Visits every stored record
    fn for_each(
        &self,
        visit: &mut dyn FnMut(&ResultItem) -> StorageResult<()>,
    ) -> StorageResult<()>;

    /// Replaces the uniqueness key used by subsequent calls
    fn set_key(&self, key: IndexKey);

    /// The uniqueness key currently in use
    fn key(&self) -> IndexKey;

    /// Number of stored records
    fn size(&self) -> StorageResult<i64>;

    /// Releases the backend; later calls fail with [`StorageError::Closed`]
    fn close(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fields(HashMap<&'static str, &'static str>);

    impl KeyValue for Fields {
        fn key_value(&self, field: &str) -> Option<String> {
            self.0.get(field).map(|v| v.to_string())
        }
    }

    #[test]
    fn test_index_key_joins_fields_in_order() {
        let record = Fields(HashMap::from([("site", "demo"), ("title", "x")]));
        let forward = IndexKey::new(["site", "title"]).value_for(&record).unwrap();
        let backward = IndexKey::new(["title", "site"]).value_for(&record).unwrap();
        assert_ne!(forward, backward);
        assert!(forward.starts_with("demo"));
    }

    #[test]
    fn test_index_key_missing_field() {
        let record = Fields(HashMap::from([("site", "demo"), ("title", "")]));
        let result = IndexKey::new(["site", "title"]).value_for(&record);
        assert!(matches!(
            result,
            Err(StorageError::MissingKeyField { ref field }) if field == "title"
        ));
    }
}
