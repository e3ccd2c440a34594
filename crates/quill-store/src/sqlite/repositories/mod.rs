//! Stateless repositories — every method takes `&Connection` plus the
//! configured table name, so the same code runs on a pooled connection or
//! inside an explicit transaction.

pub mod oplog;
pub mod snapshot;
