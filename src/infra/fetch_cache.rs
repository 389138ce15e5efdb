use crate::app::ports::{CachedResponse, FetchCachePort};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Per-run cache; discarded with the process
#[derive(Debug, Default)]
pub struct InMemoryFetchCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
}

impl InMemoryFetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FetchCachePort for InMemoryFetchCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn put(&self, key: &str, entry: CachedResponse) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), entry);
    }

    fn invalidate(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Cache persisted in a local SQLite file so repeated runs within the TTL skip the network
pub struct SqliteFetchCache {
    conn: Mutex<Connection>,
}

impl SqliteFetchCache {
    /// Open (or create) the cache database and purge entries older than `max_age`.
    pub fn open<P: AsRef<Path>>(path: P, max_age: Duration) -> crate::error::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS fetch_cache (
                cache_key   TEXT PRIMARY KEY,
                status      INTEGER NOT NULL,
                body        BLOB NOT NULL,
                fetched_at  INTEGER NOT NULL
            );
            "#,
        )?;
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .map_or(i64::MIN, |t| t.timestamp_millis());
        let purged = conn.execute("DELETE FROM fetch_cache WHERE fetched_at < ?1", params![cutoff])?;
        debug!("Purged {} stale fetch cache entries", purged);
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn read(&self, key: &str) -> rusqlite::Result<Option<CachedResponse>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare("SELECT status, body, fetched_at FROM fetch_cache WHERE cache_key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let status: i64 = row.get(0)?;
            let Ok(status) = u16::try_from(status) else {
                warn!("Ignoring cache entry {} with invalid status {}", key, status);
                return Ok(None);
            };
            let body: Vec<u8> = row.get(1)?;
            let fetched_at_ms: i64 = row.get(2)?;
            let Some(fetched_at) = DateTime::<Utc>::from_timestamp_millis(fetched_at_ms) else {
                return Ok(None);
            };
            Ok(Some(CachedResponse { status, body, fetched_at }))
        } else {
            Ok(None)
        }
    }

    fn write(&self, key: &str, entry: &CachedResponse) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO fetch_cache (cache_key, status, body, fetched_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cache_key) DO UPDATE SET status=excluded.status, body=excluded.body, fetched_at=excluded.fetched_at",
            params![key, i64::from(entry.status), entry.body, entry.fetched_at.timestamp_millis()],
        )?;
        Ok(())
    }
}

impl FetchCachePort for SqliteFetchCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        match self.read(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Fetch cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    fn put(&self, key: &str, entry: CachedResponse) {
        if let Err(e) = self.write(key, &entry) {
            warn!("Fetch cache write failed: {}", e);
        }
    }

    fn invalidate(&self) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute("DELETE FROM fetch_cache", []) {
            warn!("Fetch cache invalidation failed: {}", e);
        }
    }
}
