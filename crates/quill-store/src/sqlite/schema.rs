//! Schema bootstrap.
//!
//! The tables are normally provisioned out-of-band; [`ensure_schema`] exists
//! so tests and fresh deployments can create them through the store itself.
//! It is idempotent and is not a migration framework.
//!
//! The composite primary keys are load-bearing: the snapshot key enforces
//! "at most one row per document", and the op key is the uniqueness
//! constraint the optimistic append protocol relies on to detect duplicate
//! version submissions.

use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::errors::Result;

/// Create the snapshot and op tables if they do not exist yet.
pub fn ensure_schema(conn: &Connection, config: &StoreConfig) -> Result<()> {
    // Table names are interpolated; validation guarantees they are bare
    // identifiers before any SQL is built.
    config.validate()?;

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {snapshots} (
            collection TEXT NOT NULL,
            name       TEXT NOT NULL,
            data       TEXT,
            PRIMARY KEY (collection, name)
         );
         CREATE TABLE IF NOT EXISTS {ops} (
            collection_name TEXT NOT NULL,
            document_name   TEXT NOT NULL,
            version         INTEGER NOT NULL CHECK (version >= 0),
            data            TEXT NOT NULL,
            PRIMARY KEY (collection_name, document_name, version)
         );",
        snapshots = config.snapshot_table,
        ops = config.op_table,
    ))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
