//! Operation payload conventions.
//!
//! An operation is an opaque JSON value produced by the OT engine. The one
//! field the store depends on is `v` — the version the operation was written
//! at. The store never transforms payloads; it only reads `v` to place the
//! row and enforces that the embedded version matches the version column.

use serde_json::Value;

/// Name of the embedded version field on op payloads.
pub const VERSION_FIELD: &str = "v";

/// Read the embedded version from an op payload.
///
/// Returns `None` when the field is missing, negative, fractional, or not a
/// number — callers treat that as a malformed payload. Values above
/// `i64::MAX` are also rejected: the version column is a signed 64-bit
/// integer in the backing store.
pub fn embedded_version(op: &Value) -> Option<u64> {
    let v = op.get(VERSION_FIELD)?.as_u64()?;
    if v > i64::MAX as u64 {
        return None;
    }
    Some(v)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
