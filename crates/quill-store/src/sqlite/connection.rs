//! Connection pool management.
//!
//! Every store instance owns one r2d2 pool. Connections are configured on
//! checkout-creation with WAL journaling (readers never block on the single
//! writer), foreign keys, and a busy timeout so short lock contention is
//! absorbed inside SQLite before the store-level retry loop kicks in.

use std::sync::atomic::{AtomicU64, Ordering};

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;

use crate::config::StoreConfig;
use crate::errors::Result;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Tuning knobs for the pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum number of pooled connections.
    pub max_pool_size: u32,
    /// `PRAGMA busy_timeout`, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Counter distinguishing shared-cache in-memory databases per store, so
/// two in-memory stores in one process never alias each other's data.
static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a pool for the configured database.
///
/// A plain in-memory database would give every pooled connection its own
/// private data, so `":memory:"` is mapped to a uniquely named
/// `cache=shared` URI — all connections in the pool then see one database,
/// which lives as long as the pool holds at least one connection.
pub fn new_pool(store: &StoreConfig, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let manager = if store.db_path == ":memory:" {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        SqliteConnectionManager::file(format!("file:quill-mem-{seq}?mode=memory&cache=shared"))
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
    } else {
        SqliteConnectionManager::file(&store.db_path)
    };

    let busy_timeout_ms = config.busy_timeout_ms;
    let manager = manager.with_init(move |conn| {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {busy_timeout_ms};"
        ))
    });

    let pool = r2d2::Pool::builder()
        .max_size(config.max_pool_size)
        .build(manager)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_shares_one_database() {
        let store = StoreConfig::new(":memory:", "snapshots", "ops");
        let pool = new_pool(&store, &ConnectionConfig::default()).unwrap();

        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE probe (x INTEGER)").unwrap();
            let _ = conn.execute("INSERT INTO probe (x) VALUES (7)", []).unwrap();
        }

        // A different pooled connection must see the same data.
        let conn = pool.get().unwrap();
        let x: i64 = conn
            .query_row("SELECT x FROM probe", [], |row| row.get(0))
            .unwrap();
        assert_eq!(x, 7);
    }

    #[test]
    fn two_in_memory_pools_are_isolated() {
        let store = StoreConfig::new(":memory:", "snapshots", "ops");
        let pool_a = new_pool(&store, &ConnectionConfig::default()).unwrap();
        let pool_b = new_pool(&store, &ConnectionConfig::default()).unwrap();

        pool_a
            .get()
            .unwrap()
            .execute_batch("CREATE TABLE only_in_a (x INTEGER)")
            .unwrap();

        let count: i64 = pool_b
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'only_in_a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn on_disk_pool_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.db");
        let store = StoreConfig::new(path.to_string_lossy(), "snapshots", "ops");

        let pool = new_pool(&store, &ConnectionConfig::default()).unwrap();
        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE probe (x INTEGER)")
            .unwrap();
        drop(pool);

        let pool = new_pool(&store, &ConnectionConfig::default()).unwrap();
        let count: i64 = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'probe'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
