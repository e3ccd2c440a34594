//! Store configuration.
//!
//! Three values are required at construction: the database path and the two
//! table names. Validation is synchronous and fatal — a store with missing
//! or unusable configuration never gets as far as opening a pool.

use crate::errors::{Result, StoreError};

/// Connection target and table names for one store instance.
///
/// Table names are interpolated into SQL statements (they cannot be bound
/// as parameters), so they must be plain SQL identifiers; anything else is
/// rejected by [`validate`](Self::validate).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite database path. `":memory:"` selects a process-unique
    /// shared-cache in-memory database.
    pub db_path: String,
    /// Table holding one snapshot row per `(collection, name)` pair.
    pub snapshot_table: String,
    /// Table holding the append-only operation log.
    pub op_table: String,
}

impl StoreConfig {
    /// Create a configuration. Call [`validate`](Self::validate) (or let
    /// `DocStore::open` do it) before use.
    pub fn new(
        db_path: impl Into<String>,
        snapshot_table: impl Into<String>,
        op_table: impl Into<String>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            snapshot_table: snapshot_table.into(),
            op_table: op_table.into(),
        }
    }

    /// Check that every required value is present and usable.
    pub fn validate(&self) -> Result<()> {
        if self.db_path.is_empty() {
            return Err(StoreError::Config("db_path is required".into()));
        }
        check_identifier("snapshot_table", &self.snapshot_table)?;
        check_identifier("op_table", &self.op_table)?;
        if self.snapshot_table == self.op_table {
            return Err(StoreError::Config(
                "snapshot_table and op_table must name different tables".into(),
            ));
        }
        Ok(())
    }
}

/// Reject anything that is not a bare SQL identifier.
fn check_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::Config(format!(
            "{field} must be a plain SQL identifier, got {value:?}"
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
