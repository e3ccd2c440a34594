//! # quill-store
//!
//! SQLite persistence backend for the Quill collaborative-document engine.
//!
//! Stores two kinds of state per document: the latest materialized
//! **snapshot** and the append-only **operation log** that produced it.
//! The two stores are logically independent — no cross-store transaction;
//! the OT engine reconciles them by replaying ops past the last snapshot
//! version.
//!
//! The concurrency protocol:
//!
//! - **Snapshot upsert** runs as one IMMEDIATE transaction so the
//!   conditional-UPDATE→INSERT sequence cannot race, even for brand-new
//!   documents with no row to update.
//! - **Op append** is optimistic: writers race for a version number and the
//!   `(collection_name, document_name, version)` primary key picks exactly
//!   one winner; losers are absorbed as already-recorded, not errors.
//! - **Reads** run on pooled connections at the database's default
//!   single-statement isolation.
//!
//! All facade operations on [`DocStore`] are async; blocking SQLite work is
//! confined to the tokio blocking pool.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod sqlite;
pub mod store;

pub use config::StoreConfig;
pub use errors::{Result, StoreError};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use sqlite::repositories::oplog::OpInsert;
pub use store::doc_store::{DocStore, WriteOp};
