//! The [`Snapshot`] record and the bulk-lookup request vocabulary.
//!
//! A snapshot is the latest materialized state of one document, as opposed
//! to the log of operations that produced it. The `data` payload is stored
//! as opaque [`serde_json::Value`] — the store never interprets it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The materialized state of one document.
///
/// At most one snapshot exists per `(collection, name)` pair at any time;
/// the store enforces this with a composite primary key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Logical namespace the document lives in.
    pub collection: String,
    /// Document identifier, unique within its collection.
    pub name: String,
    /// Materialized document content (opaque JSON).
    pub data: Value,
}

impl Snapshot {
    /// Create a snapshot record.
    pub fn new(collection: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self {
            collection: collection.into(),
            name: name.into(),
            data,
        }
    }
}

/// An ordered set of `(collection, document names)` pairs for one batched
/// snapshot lookup.
///
/// Order is preserved so the resulting query predicate is deterministic.
/// Pushing the same collection twice merges into the existing entry, and
/// duplicate names within a collection are dropped — the request behaves
/// like a mapping of collection to an ordered name set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkSnapshotRequest {
    entries: Vec<(String, Vec<String>)>,
}

impl BulkSnapshotRequest {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add document names to a collection's lookup set.
    ///
    /// A collection added with no names still appears in the request (and
    /// therefore in the result, as an empty mapping) — callers use this to
    /// distinguish "no matches" from "not requested".
    pub fn add<I, S>(&mut self, collection: impl Into<String>, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let collection = collection.into();
        let idx = match self.entries.iter().position(|(c, _)| *c == collection) {
            Some(idx) => idx,
            None => {
                self.entries.push((collection, Vec::new()));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[idx].1;
        for name in names {
            let name = name.into();
            if !entry.contains(&name) {
                entry.push(name);
            }
        }
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with<I, S>(mut self, collection: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(collection, names);
        self
    }

    /// The requested `(collection, names)` pairs, in insertion order.
    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// `true` when no collections were requested at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of requested document names across all collections.
    pub fn name_count(&self) -> usize {
        self.entries.iter().map(|(_, names)| names.len()).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_serde_round_trip() {
        let snap = Snapshot::new("posts", "alpha", json!({"title": "Hello"}));
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: Snapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snap);
    }

    #[test]
    fn snapshot_uses_camel_case_fields() {
        let snap = Snapshot::new("posts", "alpha", json!(null));
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.get("collection").is_some());
        assert!(value.get("name").is_some());
        assert!(value.get("data").is_some());
    }

    #[test]
    fn bulk_request_preserves_insertion_order() {
        let req = BulkSnapshotRequest::new()
            .with("b", ["x"])
            .with("a", ["y", "z"]);
        let entries = req.entries();
        assert_eq!(entries[0].0, "b");
        assert_eq!(entries[1].0, "a");
        assert_eq!(entries[1].1, vec!["y", "z"]);
    }

    #[test]
    fn bulk_request_merges_repeated_collections() {
        let mut req = BulkSnapshotRequest::new();
        req.add("posts", ["a"]);
        req.add("posts", ["b", "a"]);
        assert_eq!(req.entries().len(), 1);
        assert_eq!(req.entries()[0].1, vec!["a", "b"]);
    }

    #[test]
    fn bulk_request_keeps_empty_collections() {
        let req = BulkSnapshotRequest::new().with("empty", Vec::<String>::new());
        assert!(!req.is_empty());
        assert_eq!(req.entries()[0].1.len(), 0);
        assert_eq!(req.name_count(), 0);
    }
}
