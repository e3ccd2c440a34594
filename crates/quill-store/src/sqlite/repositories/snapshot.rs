//! Snapshot repository — one row per `(collection, name)` pair holding the
//! latest materialized document state.
//!
//! The upsert here is only the UPDATE→INSERT step sequence; the race-freedom
//! of the whole operation comes from the facade running it inside an
//! IMMEDIATE transaction (the database write lock is held before the UPDATE
//! probes for the row, so two first-writers cannot both reach the INSERT).

use std::collections::HashMap;

use quill_core::{BulkSnapshotRequest, Snapshot};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::errors::Result;

/// Snapshot repository — stateless, every method takes `&Connection`.
pub struct SnapshotRepo;

impl SnapshotRepo {
    /// Point lookup by exact key. Absent row is `None`, never an error.
    pub fn get(
        conn: &Connection,
        table: &str,
        collection: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let raw: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT data FROM {table} WHERE collection = ?1 AND name = ?2"),
                params![collection, name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(Some(text)) => Ok(Some(serde_json::from_str(&text)?)),
            // Row exists but data is SQL NULL (external writer); surface as JSON null.
            Some(None) => Ok(Some(Value::Null)),
            None => Ok(None),
        }
    }

    /// Batched lookup across all requested `(collection, name)` pairs.
    ///
    /// One query, built as OR-of-AND predicates with an `IN` list per
    /// collection. Every requested collection appears in the result even
    /// when nothing matched; names without a snapshot are simply absent
    /// from the inner map. Fails atomically — no partial results.
    pub fn get_bulk(
        conn: &Connection,
        table: &str,
        request: &BulkSnapshotRequest,
    ) -> Result<HashMap<String, HashMap<String, Value>>> {
        let mut result: HashMap<String, HashMap<String, Value>> = request
            .entries()
            .iter()
            .map(|(collection, _)| (collection.clone(), HashMap::new()))
            .collect();

        let mut predicates: Vec<String> = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        for (collection, names) in request.entries() {
            if names.is_empty() {
                continue;
            }
            param_values.push(Box::new(collection.clone()));
            let collection_param = param_values.len();
            let placeholders: Vec<String> = names
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", param_values.len() + i + 1))
                .collect();
            for name in names {
                param_values.push(Box::new(name.clone()));
            }
            predicates.push(format!(
                "(collection = ?{collection_param} AND name IN ({}))",
                placeholders.join(", ")
            ));
        }

        if predicates.is_empty() {
            return Ok(result);
        }

        let sql = format!(
            "SELECT collection, name, data FROM {table} WHERE {}",
            predicates.join(" OR ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(Box::as_ref).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (collection, name, raw) in rows {
            let data = match raw {
                Some(text) => serde_json::from_str(&text)?,
                None => Value::Null,
            };
            let snapshot = Snapshot::new(collection, name, data);
            if let Some(inner) = result.get_mut(&snapshot.collection) {
                let _ = inner.insert(snapshot.name, snapshot.data);
            }
        }
        Ok(result)
    }

    /// Conditional UPDATE, then INSERT when no row was touched.
    ///
    /// Must run inside the caller's IMMEDIATE transaction — on a plain
    /// pooled connection the update-miss→insert window is a race.
    pub fn upsert(conn: &Connection, table: &str, snapshot: &Snapshot) -> Result<()> {
        let text = serde_json::to_string(&snapshot.data)?;
        let changed = conn.execute(
            &format!("UPDATE {table} SET data = ?1 WHERE collection = ?2 AND name = ?3"),
            params![text, snapshot.collection, snapshot.name],
        )?;
        if changed == 0 {
            let _ = conn.execute(
                &format!("INSERT INTO {table} (collection, name, data) VALUES (?1, ?2, ?3)"),
                params![snapshot.collection, snapshot.name, text],
            )?;
        }
        Ok(())
    }

    /// Row count for one key. The snapshot invariant says this is 0 or 1.
    pub fn count(conn: &Connection, table: &str, collection: &str, name: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE collection = ?1 AND name = ?2"),
            params![collection, name],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
