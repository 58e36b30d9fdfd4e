//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::search::ResultItem;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{IndexKey, Storage, StorageError, StorageResult};
use crate::storage::{classify, content_hash, Change};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
    key: RwLock<IndexKey>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            key: RwLock::new(IndexKey::default()),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    fn current_key(&self) -> IndexKey {
        match self.key.read() {
            Ok(key) => key.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn decode(data: &str) -> StorageResult<ResultItem> {
    Ok(serde_json::from_str(data)?)
}

impl Storage for SqliteStorage {
    fn find(&self, key: &str) -> StorageResult<Option<ResultItem>> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;

        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM results WHERE record_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        data.as_deref().map(decode).transpose()
    }

    fn add(&self, item: &mut ResultItem) -> StorageResult<()> {
        let record_key = self.current_key().value_for(item)?;
        let hash = content_hash(item)?;

        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;

        let stored: Option<(String, String)> = conn
            .query_row(
                "SELECT uuid, content_hash FROM results WHERE record_key = ?1",
                params![record_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let change = classify(
            item,
            stored.as_ref().map(|(uuid, h)| (uuid.as_str(), h.as_str())),
            &hash,
        );
        let now = Utc::now().to_rfc3339();
        let data = serde_json::to_string(item)?;

        match change {
            Change::Insert => {
                conn.execute(
                    "INSERT INTO results (record_key, uuid, site, fingerprint, content_hash, data, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        record_key,
                        item.uuid.as_deref().unwrap_or_default(),
                        item.site,
                        item.fingerprint,
                        hash,
                        data,
                        now
                    ],
                )?;
            }
            Change::Update => {
                conn.execute(
                    "UPDATE results SET content_hash = ?1, data = ?2, last_seen = ?3,
                     update_count = update_count + 1 WHERE record_key = ?4",
                    params![hash, data, now, record_key],
                )?;
            }
            Change::Unchanged => {
                conn.execute(
                    "UPDATE results SET last_seen = ?1 WHERE record_key = ?2",
                    params![now, record_key],
                )?;
            }
        }

        Ok(())
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&ResultItem) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;

        let mut stmt = conn.prepare("SELECT data FROM results ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for data in rows {
            let item = decode(&data?)?;
            visit(&item)?;
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
        self.current_key()
    }

    fn size(&self) -> StorageResult<i64> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?)
    }

    fn close(&self) -> StorageResult<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        }
        Ok(())
    }
}
