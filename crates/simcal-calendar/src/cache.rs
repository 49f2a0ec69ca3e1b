//! Feed cache backends: process-local and SQLite.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use simcal_core::{CacheBackend, CacheError, Config, RusqliteErrorExt};
use std::collections::HashMap;
use std::path::Path;

use crate::error::CalendarError;
use crate::types::{CacheKey, EventCollection};

/// TTL cache for computed feeds. A TTL of 0 means the entry never expires.
pub trait FeedCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<EventCollection>, CalendarError>;

    fn set(
        &self,
        key: &CacheKey,
        events: &EventCollection,
        ttl_seconds: u64,
    ) -> Result<(), CalendarError>;

    fn delete(&self, key: &CacheKey) -> Result<(), CalendarError>;

    /// Remove expired entries, returning how many were dropped.
    fn purge_expired(&self) -> Result<usize, CalendarError>;
}

/// Build the backend selected in configuration.
pub fn from_config(config: &Config) -> Result<Box<dyn FeedCache>, CalendarError> {
    let prefix = &config.cache.key_prefix;
    match config.cache.backend {
        CacheBackend::Memory => Ok(Box::new(MemoryFeedCache::new(prefix))),
        CacheBackend::Sqlite => {
            let path = config.sqlite_path().ok_or_else(|| {
                CalendarError::Database(simcal_core::DatabaseError::ConnectionFailed(
                    "cache.sqlite_path is not set".to_string(),
                ))
            })?;
            Ok(Box::new(SqliteFeedCache::new(path, prefix)?))
        }
    }
}

fn expires_at(now: i64, ttl_seconds: u64) -> Option<i64> {
    if ttl_seconds == 0 {
        None
    } else {
        Some(now.saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX)))
    }
}

/// An entry stays readable through its expiry second.
fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    expires_at.is_some_and(|at| at < now)
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    events: EventCollection,
    expires_at: Option<i64>,
}

/// Process-local feed cache.
#[derive(Debug, Default)]
pub struct MemoryFeedCache {
    prefix: String,
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryFeedCache {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: i64) -> Option<EventCollection> {
        let storage_key = key.with_prefix(&self.prefix);
        let mut entries = self.entries.lock();
        let expired = match entries.get(&storage_key) {
            Some(entry) if !is_expired(entry.expires_at, now) => {
                return Some(entry.events.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(&storage_key);
        }
        None
    }

    pub(crate) fn set_at(&self, key: &CacheKey, events: &EventCollection, ttl: u64, now: i64) {
        self.entries.lock().insert(
            key.with_prefix(&self.prefix),
            MemoryEntry {
                events: events.clone(),
                expires_at: expires_at(now, ttl),
            },
        );
    }
}

impl FeedCache for MemoryFeedCache {
    fn get(&self, key: &CacheKey) -> Result<Option<EventCollection>, CalendarError> {
        Ok(self.get_at(key, Utc::now().timestamp()))
    }

    fn set(
        &self,
        key: &CacheKey,
        events: &EventCollection,
        ttl_seconds: u64,
    ) -> Result<(), CalendarError> {
        self.set_at(key, events, ttl_seconds, Utc::now().timestamp());
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), CalendarError> {
        self.entries.lock().remove(&key.with_prefix(&self.prefix));
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, CalendarError> {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !is_expired(entry.expires_at, now));
        Ok(before - entries.len())
    }
}

fn db_err(err: rusqlite::Error) -> CalendarError {
    CalendarError::Database(err.into_database_error())
}

/// SQLite-backed feed cache.
pub struct SqliteFeedCache {
    conn: Mutex<Connection>,
    prefix: String,
}

impl SqliteFeedCache {
    /// Open (or create) a cache database at the given path.
    pub fn new<P: AsRef<Path>>(path: P, prefix: &str) -> Result<Self, CalendarError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn, prefix)
    }

    /// Create an in-memory cache database.
    pub fn in_memory(prefix: &str) -> Result<Self, CalendarError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn, prefix)
    }

    fn with_connection(conn: Connection, prefix: &str) -> Result<Self, CalendarError> {
        let cache = Self {
            conn: Mutex::new(conn),
            prefix: prefix.to_string(),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CalendarError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS feed_cache (
                    key TEXT PRIMARY KEY,
                    value_json TEXT NOT NULL,
                    expires_at INTEGER,
                    cached_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_feed_cache_expires ON feed_cache(expires_at);
                "#,
            )
            .map_err(db_err)
    }

    pub(crate) fn get_at(
        &self,
        key: &CacheKey,
        now: i64,
    ) -> Result<Option<EventCollection>, CalendarError> {
        let storage_key = key.with_prefix(&self.prefix);
        let conn = self.conn.lock();

        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value_json, expires_at FROM feed_cache WHERE key = ?1",
                params![storage_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((value_json, expires)) = row else {
            return Ok(None);
        };

        if is_expired(expires, now) {
            conn.execute("DELETE FROM feed_cache WHERE key = ?1", params![storage_key])
                .map_err(db_err)?;
            return Ok(None);
        }

        let events = serde_json::from_str(&value_json).map_err(|e| {
            CalendarError::Cache(CacheError::Deserialization {
                key: storage_key.clone(),
                message: e.to_string(),
            })
        })?;
        Ok(Some(events))
    }

    pub(crate) fn set_at(
        &self,
        key: &CacheKey,
        events: &EventCollection,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<(), CalendarError> {
        let value_json = serde_json::to_string(events)
            .map_err(|e| CalendarError::Cache(CacheError::Serialization(e.to_string())))?;

        self.conn
            .lock()
            .execute(
                r#"
                INSERT OR REPLACE INTO feed_cache (key, value_json, expires_at, cached_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    key.with_prefix(&self.prefix),
                    value_json,
                    expires_at(now, ttl_seconds),
                    now
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn purge_at(&self, now: i64) -> Result<usize, CalendarError> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM feed_cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now],
            )
            .map_err(db_err)
    }

    /// Remove every cached feed.
    pub fn clear(&self) -> Result<(), CalendarError> {
        self.conn
            .lock()
            .execute_batch("DELETE FROM feed_cache;")
            .map_err(db_err)
    }
}

impl FeedCache for SqliteFeedCache {
    fn get(&self, key: &CacheKey) -> Result<Option<EventCollection>, CalendarError> {
        self.get_at(key, Utc::now().timestamp())
    }

    fn set(
        &self,
        key: &CacheKey,
        events: &EventCollection,
        ttl_seconds: u64,
    ) -> Result<(), CalendarError> {
        self.set_at(key, events, ttl_seconds, Utc::now().timestamp())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), CalendarError> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM feed_cache WHERE key = ?1",
                params![key.with_prefix(&self.prefix)],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, CalendarError> {
        self.purge_at(Utc::now().timestamp())
    }
}
