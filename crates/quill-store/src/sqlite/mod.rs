//! SQLite backend: connection pooling, schema bootstrap, and the
//! per-table repositories.

pub mod connection;
pub mod repositories;
pub mod schema;
