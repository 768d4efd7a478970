use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};

const CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at_unix INTEGER NOT NULL
);
"#;

/// Get-or-compute-with-TTL cache. The generator runs only on miss or expiry,
/// and implementations hold their lock across lookup-generate-store, so at
/// most one generator executes per key at a time. Generator failures are
/// passed through and never cached.
pub trait Cache: Send + Sync {
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        generator: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String>;
}

struct MemoryEntry {
    value: String,
    expires_at_unix: u64,
}

/// Process-local backend. State dies with the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        generator: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        let now = unix_timestamp()?;
        if let Some(entry) = entries.get(key)
            && entry.expires_at_unix > now
        {
            return Ok(entry.value.clone());
        }
        let value = generator()?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.clone(),
                expires_at_unix: now.saturating_add(ttl.as_secs()),
            },
        );
        Ok(value)
    }
}

/// Durable backend surviving process restarts; one small key/value table.
pub struct SqliteCache {
    connection: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        connection
            .execute_batch(CACHE_SCHEMA_SQL)
            .context("failed to initialize cache schema")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Delete expired rows; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("sqlite cache mutex poisoned"))?;
        let now = unix_timestamp()?;
        let removed = connection
            .execute(
                "DELETE FROM cache_entries WHERE expires_at_unix <= ?1",
                params![i64::try_from(now).context("timestamp does not fit into i64")?],
            )
            .context("failed to purge expired cache rows")?;
        Ok(removed)
    }
}

impl Cache for SqliteCache {
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        generator: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("sqlite cache mutex poisoned"))?;
        let now = unix_timestamp()?;
        let now_i64 = i64::try_from(now).context("timestamp does not fit into i64")?;

        let mut statement = connection
            .prepare("SELECT value FROM cache_entries WHERE key = ?1 AND expires_at_unix > ?2 LIMIT 1")
            .context("failed to prepare cache lookup")?;
        let mut rows = statement
            .query(params![key, now_i64])
            .with_context(|| format!("failed to read cache key {key}"))?;
        if let Some(row) = rows.next().context("failed to decode cache row")? {
            let value: String = row.get(0).context("failed to decode cache value")?;
            return Ok(value);
        }
        drop(rows);
        drop(statement);

        let value = generator()?;
        let expires_at = now.saturating_add(ttl.as_secs());
        connection
            .execute(
                "INSERT INTO cache_entries (key, value, expires_at_unix) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_unix = excluded.expires_at_unix",
                params![
                    key,
                    value,
                    i64::try_from(expires_at).unwrap_or(i64::MAX)
                ],
            )
            .with_context(|| format!("failed to store cache key {key}"))?;
        Ok(value)
    }
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}
