//! Published snapshots of the merged document

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use semver::Version;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Problem;
use crate::merge::{MergeMap, MergeView};

/// Everything one generation produced
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generation: u64,
    /// Merged and inheritance-expanded document
    #[serde(serialize_with = "serialize_document")]
    pub document: Arc<Value>,
    #[serde(skip)]
    pub view: Option<Arc<MergeView>>,
    /// Hex SHA-256 of the canonical form of `document`
    pub hash: String,
    pub merge_map: MergeMap,
    pub problems: Vec<Problem>,
    /// Mounted layer URIs, bottom first
    pub stack: Vec<String>,
    /// Accepted package versions
    pub packages: BTreeMap<String, Version>,
}

impl Snapshot {
    /// The state before anything was published
    pub fn empty() -> Self {
        let document = Value::Object(Map::new());
        Self {
            generation: 0,
            hash: content_hash(&document),
            document: Arc::new(document),
            view: None,
            merge_map: MergeMap::default(),
            problems: Vec::new(),
            stack: Vec::new(),
            packages: BTreeMap::new(),
        }
    }

    /// Value at a `/`-separated path, e.g. `/entities/components`
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() || path == "/" {
            return Some(&self.document);
        }
        self.document.pointer(path)
    }

    /// URI of the layer that contributed `path`
    pub fn source_of(&self, path: &str) -> Option<&str> {
        self.merge_map.source_of(path)
    }
}

/// Hex SHA-256 over a canonical encoding of `value`.
///
/// Mapping keys are hashed in sorted order, so the hash depends only on
/// content, never on key order.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, value);
    format!("{:x}", hasher.finalize())
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
            hasher.update(b";");
        }
        Value::String(s) => feed_str(hasher, s),
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                feed(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                feed_str(hasher, key);
                feed(hasher, &map[key.as_str()]);
            }
            hasher.update(b"}");
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update(format!("s{}:", s.len()).as_bytes());
    hasher.update(s.as_bytes());
}

fn serialize_document<S: Serializer>(document: &Arc<Value>, serializer: S) -> Result<S::Ok, S::Error> {
    document.as_ref().serialize(serializer)
}

/// Holder of the current snapshot.
///
/// Publication is monotonic: a snapshot whose generation is not newer
/// than the current one is dropped.
#[derive(Debug)]
pub(crate) struct Publisher {
    current: RwLock<Arc<Snapshot>>,
}

impl Publisher {
    pub(crate) fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    pub(crate) fn current(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install `snapshot` unless something newer is already published
    pub(crate) fn publish(&self, snapshot: Snapshot) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if snapshot.generation <= guard.generation {
            tracing::debug!(
                generation = snapshot.generation,
                current = guard.generation,
                "Dropping stale snapshot"
            );
            return false;
        }
        *guard = Arc::new(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(generation: u64) -> Snapshot {
        Snapshot {
            generation,
            ..Snapshot::empty()
        }
    }

    #[test]
    fn hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"a": [1, 2], "b": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"b": null, "a": [1, 2]}, "x": 1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_distinguishes_types() {
        assert_ne!(content_hash(&json!({"x": "1"})), content_hash(&json!({"x": 1})));
        assert_ne!(content_hash(&json!(["ab"])), content_hash(&json!(["a", "b"])));
        assert_ne!(content_hash(&json!([1, 2])), content_hash(&json!([2, 1])));
    }

    #[test]
    fn stale_generations_are_not_published() {
        let publisher = Publisher::new();
        assert!(publisher.publish(at(2)));
        assert!(!publisher.publish(at(1)));
        assert!(!publisher.publish(at(2)));
        assert_eq!(publisher.current().generation, 2);
        assert!(publisher.publish(at(3)));
        assert_eq!(publisher.current().generation, 3);
    }

    #[test]
    fn get_follows_paths() {
        let snapshot = Snapshot {
            document: Arc::new(json!({"entities": {"a": [1, 2]}})),
            ..Snapshot::empty()
        };
        assert_eq!(snapshot.get("/entities/a/1"), Some(&json!(2)));
        assert_eq!(snapshot.get("/"), Some(&*snapshot.document));
        assert!(snapshot.get("/missing").is_none());
    }

    #[test]
    fn serializes_document_inline() {
        let snapshot = Snapshot {
            document: Arc::new(json!({"title": "A"})),
            ..at(4)
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["generation"], json!(4));
        assert_eq!(value["document"], json!({"title": "A"}));
        assert_eq!(value["stack"], json!([]));
        assert!(value.get("view").is_none());
    }
}
