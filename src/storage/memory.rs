//! In-memory storage implementation

use crate::search::ResultItem;
use crate::storage::traits::{IndexKey, Storage, StorageError, StorageResult};
use crate::storage::{classify, content_hash};
use std::sync::{Mutex, MutexGuard, RwLock};

struct Stored {
    item: ResultItem,
    hash: String,
}

#[derive(Default)]
struct Records {
    order: Vec<String>,
    by_key: std::collections::HashMap<String, Stored>,
    closed: bool,
}

/// Result store that lives for the lifetime of the process
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Records>,
    key: RwLock<IndexKey>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Records>> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StorageError::Database("memory store lock poisoned".to_string()))?;
        if guard.closed {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }
}

impl Storage for MemoryStorage {
    fn find(&self, key: &str) -> StorageResult<Option<ResultItem>> {
        Ok(self.lock()?.by_key.get(key).map(|s| s.item.clone()))
    }

    fn add(&self, item: &mut ResultItem) -> StorageResult<()> {
        let record_key = self.key().value_for(item)?;
        let hash = content_hash(item)?;

        let mut records = self.lock()?;
        let stored = records
            .by_key
            .get(&record_key)
            .map(|s| (s.item.uuid.clone().unwrap_or_default(), s.hash.clone()));
        classify(
            item,
            stored.as_ref().map(|(uuid, h)| (uuid.as_str(), h.as_str())),
            &hash,
        );

        if stored.is_none() {
            records.order.push(record_key.clone());
        }
        records.by_key.insert(
            record_key,
            Stored {
                item: item.clone(),
                hash,
            },
        );
        Ok(())
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&ResultItem) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let records = self.lock()?;
        for key in &records.order {
            if let Some(stored) = records.by_key.get(key) {
                visit(&stored.item)?;
            }
        }
        Ok(())
    }

    fn set_key(&self, key: IndexKey) {
        match self.key.write() {
            Ok(mut current) => *current = key,
            Err(poisoned) => *poisoned.into_inner() = key,
        }
    }

    fn key(&self) -> IndexKey {
        match self.key.read() {
            Ok(key) => key.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn size(&self) -> StorageResult<i64> {
        Ok(self.lock()?.order.len() as i64)
    }

    fn close(&self) -> StorageResult<()> {
        if let Ok(mut records) = self.records.lock() {
            records.closed = true;
            records.by_key.clear();
            records.order.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(seeders: u32) -> ResultItem {
        let mut item = ResultItem::new("demo");
        item.title = "Debian 12".to_string();
        item.seeders = Some(seeders);
        item.compute_fingerprint();
        item
    }

    #[test]
    fn test_same_record_twice_is_stale() {
        let storage = MemoryStorage::new();
        let mut first = item(1);
        storage.add(&mut first).unwrap();
        assert!(first.is_new);

        let mut second = item(1);
        storage.add(&mut second).unwrap();
        assert!(!second.is_new);
        assert!(!second.is_update);
    }

    #[test]
    fn test_changed_record_is_update() {
        let storage = MemoryStorage::new();
        storage.add(&mut item(1)).unwrap();

        let mut changed = item(2);
        storage.add(&mut changed).unwrap();
        assert!(!changed.is_new);
        assert!(changed.is_update);
        assert_eq!(storage.size().unwrap(), 1);
    }

    #[test]
    fn test_missing_key_field_is_rejected() {
        let storage = MemoryStorage::new();
        let mut untitled = ResultItem::new("demo");
        assert!(matches!(
            storage.add(&mut untitled),
            Err(StorageError::MissingKeyField { .. })
        ));
    }

    #[test]
    fn test_close() {
        let storage = MemoryStorage::new();
        storage.add(&mut item(1)).unwrap();
        storage.close().unwrap();
        assert!(matches!(storage.size(), Err(StorageError::Closed)));
    }
}
