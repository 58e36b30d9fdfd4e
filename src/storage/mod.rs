//! Storage module for persisting search results
//!
//! This module handles result persistence and new/updated/stale classification:
//! - The `Storage` contract and the `KeyValue`/`IndexKey` key-extraction types
//! - A SQLite backend for real runs
//! - An in-memory backend for tests and throwaway searches

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{IndexKey, KeyValue, Storage, StorageError, StorageResult};

use crate::config::StorageConfig;
use crate::search::ResultItem;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

/// Opens the SQLite store described by the configuration
///
/// # Arguments
///
/// * `config` - Storage section of the configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn Storage>)` - Ready-to-use store with the configured key
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage = SqliteStorage::new(Path::new(&config.database_path))?;
    if let Some(fields) = &config.key {
        storage.set_key(IndexKey::new(fields.iter().cloned()));
    }
    Ok(Arc::new(storage))
}

/// What `Storage::add` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Insert,
    Update,
    Unchanged,
}

/// Hash of the content fields of an item, excluding staleness flags and ids
pub(crate) fn content_hash(item: &ResultItem) -> StorageResult<String> {
    let mut content = item.clone();
    content.uuid = None;
    content.is_new = false;
    content.is_update = false;

    let bytes = serde_json::to_vec(&content)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Compares an item against its stored copy and sets its staleness flags
///
/// `stored` holds the stored uuid and content hash, if the key is known.
pub(crate) fn classify(item: &mut ResultItem, stored: Option<(&str, &str)>, hash: &str) -> Change {
    match stored {
        None => {
            item.is_new = true;
            item.is_update = false;
            item.uuid = Some(new_uuid(&item.site, hash));
            Change::Insert
        }
        Some((uuid, stored_hash)) => {
            item.is_new = false;
            item.is_update = stored_hash != hash;
            item.uuid = Some(uuid.to_string());
            if item.is_update {
                Change::Update
            } else {
                Change::Unchanged
            }
        }
    }
}

/// Builds a UUID-shaped identifier from a seed and the current time
fn new_uuid(site: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_bytes());
    hasher.update(seed.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}
