//! Error taxonomy for the persistence backend.
//!
//! One deliberate asymmetry: a unique-constraint violation on op insert is
//! NOT an error — it is classified at the insert site (see
//! [`is_unique_violation`]) and absorbed into the success path, because
//! "this version is already recorded" is an expected steady-state outcome
//! under concurrent submission. Every other failure propagates.

use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Required configuration missing or unusable. Raised synchronously at
    /// construction, never deferred to first use.
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// Operation attempted after `close()` released the connection pool.
    #[error("store is closed")]
    Closed,

    /// Op payload without a usable embedded version field.
    #[error("malformed op payload: {0}")]
    MalformedOp(String),

    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure (checkout timeout, init failure).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Stored payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join errors and poisoned locks.
    #[error("internal error: {0}")]
    Internal(String),
}

/// `true` when the error is a unique/primary-key constraint violation.
///
/// SQLite reports composite-primary-key conflicts with the
/// `SQLITE_CONSTRAINT_PRIMARYKEY` extended code and plain UNIQUE indexes
/// with `SQLITE_CONSTRAINT_UNIQUE`; the op table's `(collection_name,
/// document_name, version)` key can surface as either depending on schema.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn classifies_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k INTEGER PRIMARY KEY NOT NULL, v TEXT)")
            .unwrap();
        let _ = conn
            .execute("INSERT INTO t (k, v) VALUES (1, 'a')", [])
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (k, v) VALUES (1, 'b')", [])
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn classifies_composite_primary_key_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a TEXT NOT NULL, b INTEGER NOT NULL, PRIMARY KEY (a, b))",
        )
        .unwrap();
        let _ = conn
            .execute("INSERT INTO t (a, b) VALUES ('x', 0)", [])
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (a, b) VALUES ('x', 0)", [])
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn other_errors_are_not_unique_violations() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(!is_unique_violation(&err));
    }
}
