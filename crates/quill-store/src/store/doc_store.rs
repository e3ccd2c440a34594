//! High-level [`DocStore`] facade.
//!
//! Combines the snapshot store and the operation-log store under one
//! configuration and exposes the async operations consumed by the OT
//! engine. Blocking SQLite work runs on the tokio blocking pool; the
//! caller's task suspends at the I/O boundary and resumes on completion.
//!
//! INVARIANT: snapshot upserts for one document are serialized — first by
//! a per-document in-process mutex, then by the IMMEDIATE transaction's
//! database write lock. The op log needs no such serialization: concurrent
//! appends race on the `(collection, document, version)` primary key and
//! losers are absorbed as already-recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use quill_core::{BulkSnapshotRequest, Snapshot, embedded_version};
use rusqlite::TransactionBehavior;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool};
use crate::sqlite::repositories::oplog::{OpInsert, OpLogRepo};
use crate::sqlite::repositories::snapshot::SnapshotRepo;
use crate::sqlite::schema;

/// Result of one [`DocStore::write_op`] call.
///
/// The payload always comes back unchanged. `created` distinguishes "this
/// call inserted the row" from "the version was already recorded" (a
/// retried submission, or a concurrent writer won the race) — a caller
/// whose write came back `created == false` re-reads the version state and
/// retries at a fresh version if its op must still be applied.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOp {
    /// The submitted op payload, verbatim.
    pub op: Value,
    /// `true` when this call created the row.
    pub created: bool,
}

/// Per-document write-lock map entry.
type DocKey = (String, String);

/// The persistence facade for one pair of snapshot/op tables.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
#[derive(Debug)]
pub struct DocStore {
    config: StoreConfig,
    /// `None` once closed. Teardown is a one-time transition; a second
    /// `close()` observes `None` and returns immediately.
    pool: Mutex<Option<ConnectionPool>>,
    doc_write_locks: Mutex<HashMap<DocKey, Weak<Mutex<()>>>>,
}

impl DocStore {
    const BUSY_MAX_RETRIES: u32 = 32;

    /// Open a store with default pool tuning.
    ///
    /// Configuration is validated synchronously — missing values fail here,
    /// not on first use.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with(config, &ConnectionConfig::default())
    }

    /// Open a store with explicit pool tuning.
    pub fn open_with(config: StoreConfig, conn_config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let pool = connection::new_pool(&config, conn_config)?;
        Ok(Self {
            config,
            pool: Mutex::new(Some(pool)),
            doc_write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create the snapshot and op tables if absent (test/bootstrap path).
    pub async fn ensure_schema(&self) -> Result<()> {
        let pool = self.pool()?;
        let config = self.config.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            schema::ensure_schema(&conn, &config)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch the latest snapshot data for one document, or `None`.
    pub async fn get_snapshot(&self, collection: &str, name: &str) -> Result<Option<Value>> {
        let pool = self.pool()?;
        let table = self.config.snapshot_table.clone();
        let collection = collection.to_string();
        let name = name.to_string();
        run_blocking(move || {
            let conn = pool.get()?;
            SnapshotRepo::get(&conn, &table, &collection, &name)
        })
        .await
    }

    /// Batched snapshot lookup.
    ///
    /// One query for all requested `(collection, name)` pairs. Every
    /// requested collection appears in the result even when empty; names
    /// with no snapshot are absent from the inner map. Fails atomically.
    pub async fn bulk_get_snapshot(
        &self,
        request: BulkSnapshotRequest,
    ) -> Result<HashMap<String, HashMap<String, Value>>> {
        let pool = self.pool()?;
        let table = self.config.snapshot_table.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            SnapshotRepo::get_bulk(&conn, &table, &request)
        })
        .await
    }

    /// Race-safe snapshot upsert. Returns the written data verbatim.
    ///
    /// Runs as one IMMEDIATE transaction: the database write lock is taken
    /// before the conditional UPDATE probes for the row, which closes the
    /// window where two first-writers would both fall through to INSERT.
    /// Any step failure rolls the whole transaction back and surfaces one
    /// [`StoreError`].
    #[instrument(skip(self, data))]
    pub async fn write_snapshot(
        &self,
        collection: &str,
        name: &str,
        data: Value,
    ) -> Result<Value> {
        let pool = self.pool()?;
        let table = self.config.snapshot_table.clone();
        let doc_lock = self.acquire_doc_write_lock(collection, name)?;
        let snapshot = Snapshot::new(collection, name, data);

        let written = run_blocking(move || {
            let _guard = doc_lock
                .lock()
                .map_err(|_| StoreError::Internal("document write lock poisoned".into()))?;
            retry_on_busy(|| {
                let mut conn = pool.get()?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                SnapshotRepo::upsert(&tx, &table, &snapshot)?;
                tx.commit()?;
                Ok(())
            })?;
            debug!(
                collection = %snapshot.collection,
                name = %snapshot.name,
                "snapshot written"
            );
            Ok(snapshot)
        })
        .await?;
        Ok(written.data)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operation log
    // ─────────────────────────────────────────────────────────────────────

    /// One plus the maximum recorded op version, or 0 with no ops.
    ///
    /// Advisory: callers use it to pick the next version to submit, but the
    /// reservation happens at [`write_op`](Self::write_op) via the
    /// uniqueness constraint, not here.
    pub async fn get_version(&self, collection: &str, name: &str) -> Result<u64> {
        let pool = self.pool()?;
        let table = self.config.op_table.clone();
        let collection = collection.to_string();
        let name = name.to_string();
        run_blocking(move || {
            let conn = pool.get()?;
            OpLogRepo::next_version(&conn, &table, &collection, &name)
        })
        .await
    }

    /// Append one op at the version embedded in its payload (`v` field).
    ///
    /// A duplicate-version conflict is an expected outcome, not an error:
    /// exactly one of the racing writers creates the row, the rest get
    /// their payload back with `created == false`. A payload without a
    /// usable `v` is rejected as [`StoreError::MalformedOp`]; any other
    /// failure propagates.
    #[instrument(skip(self, op))]
    pub async fn write_op(&self, collection: &str, name: &str, op: Value) -> Result<WriteOp> {
        let version = embedded_version(&op).ok_or_else(|| {
            StoreError::MalformedOp(
                "op payload is missing a non-negative integer `v` field".into(),
            )
        })?;
        let pool = self.pool()?;
        let table = self.config.op_table.clone();
        let collection = collection.to_string();
        let name = name.to_string();

        run_blocking(move || {
            let outcome = retry_on_busy(|| {
                let conn = pool.get()?;
                OpLogRepo::insert(&conn, &table, &collection, &name, version, &op)
            })?;
            let created = match outcome {
                OpInsert::Created => true,
                OpInsert::AlreadyRecorded => {
                    debug!(%collection, %name, version, "op version already recorded");
                    false
                }
            };
            Ok(WriteOp { op, created })
        })
        .await
    }

    /// Ops with `version >= start` and, when `end` is given, `version < end`
    /// (half-open), ascending by version. Empty range is an empty vec.
    pub async fn get_ops(
        &self,
        collection: &str,
        name: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<Value>> {
        let pool = self.pool()?;
        let table = self.config.op_table.clone();
        let collection = collection.to_string();
        let name = name.to_string();
        run_blocking(move || {
            let conn = pool.get()?;
            OpLogRepo::range(&conn, &table, &collection, &name, start, end)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Release the connection pool. Idempotent: a second call observes the
    /// already-closed state and returns immediately, without touching the
    /// database. Subsequent data operations fail with [`StoreError::Closed`].
    #[allow(clippy::unused_async)] // async for interface uniformity; no I/O
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let mut guard = self
            .pool
            .lock()
            .map_err(|_| StoreError::Internal("pool lock poisoned".into()))?;
        match guard.take() {
            Some(pool) => {
                drop(pool);
                debug!("store closed");
            }
            None => debug!("store already closed"),
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Clone the pool handle, or fail fast when closed.
    fn pool(&self) -> Result<ConnectionPool> {
        let guard = self
            .pool
            .lock()
            .map_err(|_| StoreError::Internal("pool lock poisoned".into()))?;
        guard.as_ref().cloned().ok_or(StoreError::Closed)
    }

    /// Get (or create) the in-process write lock for one document.
    fn acquire_doc_write_lock(&self, collection: &str, name: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .doc_write_locks
            .lock()
            .map_err(|_| StoreError::Internal("document lock map poisoned".into()))?;

        // Opportunistically prune dead weak refs when the map grows.
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        let key = (collection.to_string(), name.to_string());
        if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(key, Arc::downgrade(&lock));
        Ok(lock)
    }
}

/// Run blocking SQLite work on the tokio blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| StoreError::Internal(format!("blocking task join error: {err}")))?
}

/// Retry an operation on SQLite BUSY/LOCKED with linear backoff + jitter.
///
/// Backoff: base = min(attempts * 10, 500) ms, jitter ±25% to prevent
/// thundering herd when multiple writers contend on the same database.
fn retry_on_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempts = 0;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy_or_locked(&err) && attempts < DocStore::BUSY_MAX_RETRIES => {
                attempts += 1;
                let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                let jitter_range = base_ms / 4;
                let jitter = if jitter_range > 0 {
                    rand::random::<u64>() % (jitter_range * 2 + 1)
                } else {
                    0
                };
                let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                std::thread::sleep(Duration::from_millis(backoff_ms));
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_busy_or_locked(err: &StoreError) -> bool {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => {
            matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::future::join_all;
    use serde_json::json;

    async fn setup() -> DocStore {
        let store = DocStore::open(StoreConfig::new(":memory:", "snapshots", "ops")).unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    fn op(v: u64) -> Value {
        json!({"v": v, "op": [{"p": ["body", 0], "si": format!("edit-{v}")}]})
    }

    // ── Construction ──────────────────────────────────────────────────

    #[test]
    fn open_rejects_missing_db_path() {
        let result = DocStore::open(StoreConfig::new("", "snapshots", "ops"));
        assert_matches!(result, Err(StoreError::Config(_)));
    }

    #[test]
    fn open_rejects_bad_table_name() {
        let result = DocStore::open(StoreConfig::new(":memory:", "snap shots", "ops"));
        assert_matches!(result, Err(StoreError::Config(_)));
    }

    // ── Snapshots ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_snapshot_absent_is_none() {
        let store = setup().await;
        let got = store.get_snapshot("posts", "missing").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn write_then_get_snapshot() {
        let store = setup().await;
        let data = json!({"title": "Hello", "version": 3});

        let written = store
            .write_snapshot("posts", "a", data.clone())
            .await
            .unwrap();
        assert_eq!(written, data);

        let got = store.get_snapshot("posts", "a").await.unwrap();
        assert_eq!(got, Some(data));
    }

    #[tokio::test]
    async fn write_snapshot_overwrites() {
        let store = setup().await;
        store
            .write_snapshot("posts", "a", json!({"rev": 1}))
            .await
            .unwrap();
        store
            .write_snapshot("posts", "a", json!({"rev": 2}))
            .await
            .unwrap();

        let got = store.get_snapshot("posts", "a").await.unwrap();
        assert_eq!(got, Some(json!({"rev": 2})));
    }

    #[tokio::test]
    async fn concurrent_same_key_snapshot_writers() {
        let store = Arc::new(setup().await);
        let payloads: Vec<Value> = (0..8).map(|i| json!({"writer": i})).collect();

        let tasks = payloads.iter().cloned().map(|payload| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.write_snapshot("posts", "hot", payload).await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        // Last-committed-wins: final state is one of the submitted payloads,
        // and the unique key means exactly one row can exist.
        let got = store.get_snapshot("posts", "hot").await.unwrap().unwrap();
        assert!(payloads.contains(&got));

        let bulk = store
            .bulk_get_snapshot(BulkSnapshotRequest::new().with("posts", ["hot"]))
            .await
            .unwrap();
        assert_eq!(bulk["posts"].len(), 1);
    }

    #[tokio::test]
    async fn concurrent_distinct_key_snapshot_writers() {
        let store = Arc::new(setup().await);

        let tasks = (0..8).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .write_snapshot("posts", &format!("doc-{i}"), json!({"i": i}))
                    .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        for i in 0..8 {
            let got = store
                .get_snapshot("posts", &format!("doc-{i}"))
                .await
                .unwrap();
            assert_eq!(got, Some(json!({"i": i})));
        }
    }

    #[tokio::test]
    async fn bulk_get_snapshot_shape() {
        let store = setup().await;
        store.write_snapshot("a", "x", json!("dataX")).await.unwrap();
        store.write_snapshot("b", "z", json!("dataZ")).await.unwrap();

        let request = BulkSnapshotRequest::new()
            .with("a", ["x", "y"])
            .with("b", ["z"])
            .with("c", Vec::<String>::new());
        let got = store.bulk_get_snapshot(request).await.unwrap();

        assert_eq!(got.len(), 3);
        assert_eq!(got["a"]["x"], json!("dataX"));
        assert!(!got["a"].contains_key("y"));
        assert_eq!(got["b"]["z"], json!("dataZ"));
        assert!(got["c"].is_empty());
    }

    // ── Operation log ─────────────────────────────────────────────────

    #[tokio::test]
    async fn get_version_starts_at_zero() {
        let store = setup().await;
        assert_eq!(store.get_version("posts", "a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_version_after_appends() {
        let store = setup().await;
        for v in 0..3 {
            let result = store.write_op("posts", "a", op(v)).await.unwrap();
            assert!(result.created);
        }
        assert_eq!(store.get_version("posts", "a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn duplicate_write_op_is_absorbed() {
        let store = setup().await;

        let first = store.write_op("posts", "a", op(0)).await.unwrap();
        assert!(first.created);

        let duplicate = json!({"v": 0, "op": ["late arrival"]});
        let second = store
            .write_op("posts", "a", duplicate.clone())
            .await
            .unwrap();
        assert!(!second.created);
        // Payload comes back unchanged even though it did not persist.
        assert_eq!(second.op, duplicate);

        // Exactly one row exists, holding the first writer's payload.
        let ops = store.get_ops("posts", "a", 0, None).await.unwrap();
        assert_eq!(ops, vec![op(0)]);
    }

    #[tokio::test]
    async fn concurrent_same_version_writers_one_wins() {
        let store = Arc::new(setup().await);

        let tasks = (0..8).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .write_op("posts", "hot", json!({"v": 0, "writer": i}))
                    .await
            })
        });
        let results: Vec<WriteOp> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let created = results.iter().filter(|r| r.created).count();
        assert_eq!(created, 1);

        let ops = store.get_ops("posts", "hot", 0, None).await.unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[tokio::test]
    async fn write_op_rejects_malformed_payload() {
        let store = setup().await;

        let result = store.write_op("posts", "a", json!({"op": []})).await;
        assert_matches!(result, Err(StoreError::MalformedOp(_)));

        let result = store.write_op("posts", "a", json!({"v": -4})).await;
        assert_matches!(result, Err(StoreError::MalformedOp(_)));
    }

    #[tokio::test]
    async fn get_ops_half_open_range() {
        let store = setup().await;
        for v in 0..5 {
            store.write_op("posts", "a", op(v)).await.unwrap();
        }

        let ops = store.get_ops("posts", "a", 1, Some(3)).await.unwrap();
        assert_eq!(ops, vec![op(1), op(2)]);

        let ops = store.get_ops("posts", "a", 1, None).await.unwrap();
        assert_eq!(ops, vec![op(1), op(2), op(3), op(4)]);
    }

    #[tokio::test]
    async fn get_ops_empty_range() {
        let store = setup().await;
        let ops = store.get_ops("posts", "untouched", 0, None).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn get_ops_start_beyond_storable_versions_is_empty() {
        let store = setup().await;
        store.write_op("posts", "a", op(0)).await.unwrap();

        let ops = store.get_ops("posts", "a", u64::MAX, None).await.unwrap();
        assert!(ops.is_empty());
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = setup().await;
        store.close().await.unwrap();
        // Second close completes without error and without I/O.
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_after_close_fail_fast() {
        let store = setup().await;
        store.close().await.unwrap();

        assert_matches!(
            store.get_snapshot("posts", "a").await,
            Err(StoreError::Closed)
        );
        assert_matches!(
            store.write_snapshot("posts", "a", json!(1)).await,
            Err(StoreError::Closed)
        );
        assert_matches!(store.write_op("posts", "a", op(0)).await, Err(StoreError::Closed));
        assert_matches!(store.get_version("posts", "a").await, Err(StoreError::Closed));
        assert_matches!(
            store.get_ops("posts", "a", 0, None).await,
            Err(StoreError::Closed)
        );
    }

    #[tokio::test]
    async fn stores_do_not_share_data() {
        let store_a = setup().await;
        let store_b = setup().await;

        store_a
            .write_snapshot("posts", "a", json!("from A"))
            .await
            .unwrap();
        let got = store_b.get_snapshot("posts", "a").await.unwrap();
        assert!(got.is_none());
    }
}
