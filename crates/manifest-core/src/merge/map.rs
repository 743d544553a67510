//! Path → source URI map ("mergeMap")
//!
//! Lets the UI say "this value came from this file". A second table keys
//! the same URIs by a hash of the path, for the file-serving endpoint that
//! exposes sources under an opaque key instead of the raw path.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::view::MergeView;

/// Document path → contributing layer URI
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeMap {
    sources: BTreeMap<String, String>,
    backend_keys: BTreeMap<String, String>,
    prefix: String,
}

impl MergeMap {
    /// Build the map for every mapping and leaf path of `view`
    pub fn build(view: &MergeView, prefix: &str) -> Self {
        let mut map = MergeMap {
            prefix: prefix.to_string(),
            ..Default::default()
        };
        map.walk(view, "");
        map
    }

    fn walk(&mut self, view: &MergeView, path: &str) {
        for key in view.keys() {
            let Some(node) = view.defining(key) else {
                continue;
            };
            let child_path = format!("{path}/{key}");
            match node.own_view(key) {
                Some(child) => {
                    self.insert(child_path.clone(), child.uri());
                    self.walk(child, &child_path);
                }
                None => self.insert(child_path, node.uri()),
            }
        }
    }

    /// Attribute `path` and everything below it to the sources of `from`.
    ///
    /// Used for fields an entity inherits from its prototype, which only
    /// exist in the expanded document.
    pub fn alias(&mut self, path: &str, from: &str) {
        let Some(uri) = self.source_of(from).map(str::to_string) else {
            return;
        };
        let nested = format!("{from}/");
        let below: Vec<(String, String)> = self
            .sources
            .range(nested.clone()..)
            .take_while(|(source, _)| source.starts_with(&nested))
            .map(|(source, uri)| (format!("{path}{}", &source[from.len()..]), uri.clone()))
            .collect();
        self.insert(path.to_string(), &uri);
        for (aliased, uri) in below {
            self.insert(aliased, &uri);
        }
    }

    fn insert(&mut self, path: String, uri: &str) {
        self.backend_keys.insert(path_key(&path), uri.to_string());
        self.sources.insert(path, uri.to_string());
    }

    /// URI that most specifically contributed `path`.
    ///
    /// Paths below a leaf (e.g. into an array item) resolve to the nearest
    /// mapped ancestor.
    pub fn source_of(&self, path: &str) -> Option<&str> {
        let mut current = path.trim_end_matches('/');
        loop {
            if let Some(uri) = self.sources.get(current) {
                return Some(uri);
            }
            match current.rfind('/') {
                Some(pos) if pos > 0 => current = &current[..pos],
                _ => return None,
            }
        }
    }

    /// Opaque location under which the source of `path` is served
    pub fn public_location(&self, path: &str) -> Option<String> {
        self.source_of(path)?;
        Some(format!("{}{}/", self.prefix, path_key(path)))
    }

    /// Resolve an opaque path key back to its source URI
    pub fn resolve_key(&self, key: &str) -> Option<&str> {
        self.backend_keys.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Hex SHA-256 of a document path
pub fn path_key(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn mount(uri: &str, revision: u64, content: Value, parent: Option<&Arc<MergeView>>) -> Arc<MergeView> {
        let Value::Object(map) = content else {
            panic!("expected object")
        };
        MergeView::mount(&Arc::from(uri), revision, &map, parent, None)
    }

    fn sample() -> MergeMap {
        let base = mount(
            "base.yaml",
            1,
            json!({"entities": {"foo": {"bar": 1, "baz": [1, 2]}}, "title": "Base"}),
            None,
        );
        let top = mount(
            "top.yaml",
            2,
            json!({"entities": {"foo": {"bar": 2}}}),
            Some(&base),
        );
        MergeMap::build(&top, "backend://")
    }

    #[test]
    fn maps_mappings_to_topmost_contributor() {
        let map = sample();
        assert_eq!(map.source_of("/entities"), Some("top.yaml"));
        assert_eq!(map.source_of("/entities/foo"), Some("top.yaml"));
        assert_eq!(map.source_of("/entities/foo/bar"), Some("top.yaml"));
        assert_eq!(map.source_of("/entities/foo/baz"), Some("base.yaml"));
        assert_eq!(map.source_of("/title"), Some("base.yaml"));
    }

    #[test]
    fn deeper_paths_fall_back_to_nearest_ancestor() {
        let map = sample();
        assert_eq!(map.source_of("/entities/foo/baz/0"), Some("base.yaml"));
        assert_eq!(map.source_of("/unknown"), None);
    }

    #[test]
    fn public_location_round_trips_through_key() {
        let map = sample();
        let location = map.public_location("/title").unwrap();
        let key = path_key("/title");
        assert_eq!(location, format!("backend://{key}/"));
        assert_eq!(map.resolve_key(&key), Some("base.yaml"));
        assert!(map.public_location("/missing").is_none());
    }

    #[test]
    fn alias_copies_sources_of_the_subtree() {
        let mut map = sample();
        map.alias("/entities/web", "/entities/foo");
        assert_eq!(map.source_of("/entities/web"), Some("top.yaml"));
        assert_eq!(map.source_of("/entities/web/bar"), Some("top.yaml"));
        assert_eq!(map.source_of("/entities/web/baz"), Some("base.yaml"));
        assert_eq!(map.resolve_key(&path_key("/entities/web/baz")), Some("base.yaml"));

        map.alias("/entities/ghost", "/nothing");
        assert_eq!(map.source_of("/entities/ghost"), Some("top.yaml"));
    }

    #[test]
    fn path_key_is_sha256_hex() {
        assert_eq!(path_key("/title").len(), 64);
        assert_ne!(path_key("/a"), path_key("/b"));
    }
}
