//! # quill-core
//!
//! Foundation types for the Quill collaborative-document engine.
//!
//! This crate provides the shared vocabulary between the OT engine and the
//! persistence backend:
//!
//! - **Snapshots**: [`snapshot::Snapshot`], the materialized state of one
//!   document, and [`snapshot::BulkSnapshotRequest`] for batched lookups
//! - **Operations**: payload conventions in [`ops`] — an op payload is an
//!   opaque JSON value carrying its own version in the `v` field
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `quill-store` and by engine-side
//! consumers of the store.

#![deny(unsafe_code)]

pub mod ops;
pub mod snapshot;

pub use ops::{VERSION_FIELD, embedded_version};
pub use snapshot::{BulkSnapshotRequest, Snapshot};
