//! Operation-log repository — append-only, version-ordered rows per
//! document.
//!
//! The optimistic concurrency control lives here: [`OpLogRepo::insert`]
//! races freely against concurrent writers and lets the primary key on
//! `(collection_name, document_name, version)` decide the winner. A losing
//! insert comes back as [`OpInsert::AlreadyRecorded`], not an error.

use rusqlite::{Connection, params};
use serde_json::Value;

use crate::errors::{Result, StoreError, is_unique_violation};

/// Largest version the INTEGER column can hold. Larger `u64` values would
/// wrap negative when bound, so they are handled explicitly at each entry
/// point instead of being cast.
const MAX_VERSION: u64 = i64::MAX as u64;

/// Outcome of one op insert attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpInsert {
    /// A new row was created.
    Created,
    /// The `(collection, document, version)` key already existed — a retried
    /// submission or a losing concurrent writer. Treated as success.
    AlreadyRecorded,
}

/// Operation-log repository — stateless, every method takes `&Connection`.
pub struct OpLogRepo;

impl OpLogRepo {
    /// One plus the maximum recorded version, or 0 with no ops.
    ///
    /// Advisory only: this read is inherently racy under concurrency, and
    /// correctness is enforced by the uniqueness constraint at insert time.
    pub fn next_version(
        conn: &Connection,
        table: &str,
        collection: &str,
        doc: &str,
    ) -> Result<u64> {
        let max: Option<i64> = conn.query_row(
            &format!(
                "SELECT MAX(version) FROM {table}
                 WHERE collection_name = ?1 AND document_name = ?2"
            ),
            params![collection, doc],
            |row| row.get(0),
        )?;
        Ok(max.map_or(0, |m| m as u64 + 1))
    }

    /// Insert one op row at the given version.
    ///
    /// A unique-constraint violation is classified and returned as
    /// [`OpInsert::AlreadyRecorded`]; every other failure propagates.
    pub fn insert(
        conn: &Connection,
        table: &str,
        collection: &str,
        doc: &str,
        version: u64,
        op: &Value,
    ) -> Result<OpInsert> {
        if version > MAX_VERSION {
            return Err(StoreError::MalformedOp(format!(
                "version {version} exceeds the storable range"
            )));
        }
        let text = serde_json::to_string(op)?;
        let outcome = conn.execute(
            &format!(
                "INSERT INTO {table} (collection_name, document_name, version, data)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![collection, doc, version as i64, text],
        );
        match outcome {
            Ok(_) => Ok(OpInsert::Created),
            Err(err) if is_unique_violation(&err) => Ok(OpInsert::AlreadyRecorded),
            Err(err) => Err(err.into()),
        }
    }

    /// Ops with `version >= start` and, when `end` is given, `version < end`
    /// (half-open interval), ascending by version.
    ///
    /// The ordering is load-bearing — callers replay these in sequence to
    /// reconstruct document state.
    pub fn range(
        conn: &Connection,
        table: &str,
        collection: &str,
        doc: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<Value>> {
        // No stored version can exceed MAX_VERSION, so a start beyond it
        // selects nothing and an end beyond it is the same as no bound.
        if start > MAX_VERSION {
            return Ok(Vec::new());
        }
        let end = end.filter(|&e| e <= MAX_VERSION);

        let raw: Vec<String> = match end {
            Some(end) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT data FROM {table}
                     WHERE collection_name = ?1 AND document_name = ?2
                       AND version >= ?3 AND version < ?4
                     ORDER BY version ASC"
                ))?;
                let rows = stmt.query_map(
                    params![collection, doc, start as i64, end as i64],
                    |row| row.get(0),
                )?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT data FROM {table}
                     WHERE collection_name = ?1 AND document_name = ?2
                       AND version >= ?3
                     ORDER BY version ASC"
                ))?;
                let rows =
                    stmt.query_map(params![collection, doc, start as i64], |row| row.get(0))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        raw.iter()
            .map(|text| serde_json::from_str(text).map_err(Into::into))
            .collect()
    }

    /// Number of op rows for one document at one version.
    pub fn count_at_version(
        conn: &Connection,
        table: &str,
        collection: &str,
        doc: &str,
        version: u64,
    ) -> Result<i64> {
        if version > MAX_VERSION {
            return Ok(0);
        }
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {table}
                 WHERE collection_name = ?1 AND document_name = ?2 AND version = ?3"
            ),
            params![collection, doc, version as i64],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
