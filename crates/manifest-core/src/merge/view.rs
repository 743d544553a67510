//! Copy-on-difference overlay of one layer's fields over its predecessor

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

/// A field as stored on a single view node
#[derive(Debug)]
enum OwnField {
    /// Scalar or array defined by this layer
    Value(Value),
    /// Nested mapping, itself overlaid on the predecessor's mapping
    View(Arc<MergeView>),
}

/// A resolved field read through the overlay chain
#[derive(Debug, Clone)]
pub enum Node {
    Value(Value),
    View(Arc<MergeView>),
}

impl Node {
    pub fn as_view(&self) -> Option<&Arc<MergeView>> {
        match self {
            Node::View(view) => Some(view),
            Node::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(value) => Some(value),
            Node::View(_) => None,
        }
    }

    /// Materialize the node as a plain value tree
    pub fn into_value(self) -> Value {
        match self {
            Node::Value(value) => value,
            Node::View(view) => view.to_value(),
        }
    }
}

/// Read-through view of a layer's mapping over the view below it.
///
/// Each node only stores the fields its own layer defines. Reads walk the
/// explicit `parent` chain, so an untouched parent mapping is shared, never
/// copied. Lookup rules:
///
/// - a field on the child overrides the same field further down
/// - mappings recurse: the child mapping is a view over the parent mapping
/// - arrays are unioned: child items first, then parent items that are not
///   deep-equal to any child item
///
/// Views are immutable once mounted; parents are referenced read-only.
#[derive(Debug)]
pub struct MergeView {
    uri: Arc<str>,
    revision: u64,
    parent: Option<Arc<MergeView>>,
    fields: HashMap<String, OwnField>,
    order: Vec<String>,
}

impl MergeView {
    /// Mount `content` (owned by the layer at `uri`) over `parent`.
    ///
    /// When `previous` was built from the same content revision over the
    /// same parent it is returned as-is. Nested mappings are reused the same
    /// way, so a rebuild only allocates nodes along the lineage that
    /// actually changed.
    pub fn mount(
        uri: &Arc<str>,
        revision: u64,
        content: &Map<String, Value>,
        parent: Option<&Arc<MergeView>>,
        previous: Option<&Arc<MergeView>>,
    ) -> Arc<MergeView> {
        let previous = previous.filter(|prev| prev.revision == revision && prev.uri == *uri);
        if let Some(prev) = previous {
            if same_view(prev.parent.as_ref(), parent) {
                return Arc::clone(prev);
            }
        }

        let mut fields = HashMap::with_capacity(content.len());
        let mut order = Vec::with_capacity(content.len());
        for (key, value) in content {
            let field = match value {
                Value::Object(map) => {
                    let parent_view = parent.and_then(|p| p.view(key));
                    let previous_view = previous.and_then(|p| p.own_view(key));
                    OwnField::View(MergeView::mount(
                        uri,
                        revision,
                        map,
                        parent_view.as_ref(),
                        previous_view,
                    ))
                }
                other => OwnField::Value(other.clone()),
            };
            order.push(key.clone());
            fields.insert(key.clone(), field);
        }

        Arc::new(MergeView {
            uri: Arc::clone(uri),
            revision,
            parent: parent.cloned(),
            fields,
            order,
        })
    }

    /// URI of the layer that owns this node
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Content revision this node was built from
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn parent(&self) -> Option<&Arc<MergeView>> {
        self.parent.as_ref()
    }

    /// Number of nodes in the overlay chain, this one included
    pub fn depth(&self) -> usize {
        self.chain().count()
    }

    /// Field names defined by this node's own layer
    pub fn own_keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All visible field names: own fields first, then inherited ones
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for node in self.chain() {
            for key in &node.order {
                if seen.insert(key.as_str()) {
                    keys.push(key.as_str());
                }
            }
        }
        keys
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.defining(key).is_some()
    }

    /// Read a field through the overlay chain
    pub fn get(&self, key: &str) -> Option<Node> {
        let node = self.defining(key)?;
        match node.fields.get(key)? {
            OwnField::View(view) => Some(Node::View(Arc::clone(view))),
            OwnField::Value(Value::Array(items)) => {
                Some(Node::Value(Value::Array(node.union_array(key, items))))
            }
            OwnField::Value(value) => Some(Node::Value(value.clone())),
        }
    }

    /// Read a nested mapping through the overlay chain
    pub fn view(&self, key: &str) -> Option<Arc<MergeView>> {
        match self.defining(key)?.fields.get(key)? {
            OwnField::View(view) => Some(Arc::clone(view)),
            OwnField::Value(_) => None,
        }
    }

    /// URI of the layer that contributed `key`
    pub fn uri_of(&self, key: &str) -> Option<&str> {
        self.defining(key).map(MergeView::uri)
    }

    /// Materialize the whole view as a plain value tree
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for key in self.keys() {
            if let Some(node) = self.get(key) {
                map.insert(key.to_string(), node.into_value());
            }
        }
        Value::Object(map)
    }

    /// Node in the chain that defines `key`, if any
    pub(crate) fn defining(&self, key: &str) -> Option<&MergeView> {
        self.chain().find(|node| node.fields.contains_key(key))
    }

    /// Whether the defining node holds a nested view for `key`
    pub(crate) fn own_view(&self, key: &str) -> Option<&Arc<MergeView>> {
        match self.fields.get(key)? {
            OwnField::View(view) => Some(view),
            OwnField::Value(_) => None,
        }
    }

    fn chain(&self) -> impl Iterator<Item = &MergeView> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }

    fn union_array(&self, key: &str, items: &[Value]) -> Vec<Value> {
        let mut result = items.to_vec();
        let inherited = self.parent.as_ref().and_then(|p| p.get(key));
        if let Some(Node::Value(Value::Array(parent_items))) = inherited {
            result.extend(
                parent_items
                    .into_iter()
                    .filter(|item| !items.iter().any(|own| own == item)),
            );
        }
        result
    }
}

fn same_view(a: Option<&Arc<MergeView>>, b: Option<&Arc<MergeView>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn mount(uri: &str, revision: u64, content: Value, parent: Option<&Arc<MergeView>>) -> Arc<MergeView> {
        MergeView::mount(&Arc::from(uri), revision, &object(content), parent, None)
    }

    #[test]
    fn child_scalar_overrides_parent() {
        let base = mount("base.yaml", 1, json!({"title": "Base", "kept": 1}), None);
        let top = mount("top.yaml", 2, json!({"title": "Top"}), Some(&base));

        assert_eq!(top.get("title").unwrap().into_value(), json!("Top"));
        assert_eq!(top.get("kept").unwrap().into_value(), json!(1));
        assert_eq!(top.uri_of("title"), Some("top.yaml"));
        assert_eq!(top.uri_of("kept"), Some("base.yaml"));
        assert!(top.get("absent").is_none());
    }

    #[test]
    fn nested_mappings_recurse() {
        let base = mount(
            "base.yaml",
            1,
            json!({"entities": {"a": {"title": "A", "x": 1}}}),
            None,
        );
        let top = mount(
            "top.yaml",
            2,
            json!({"entities": {"a": {"title": "A2"}, "b": {"title": "B"}}}),
            Some(&base),
        );

        assert_eq!(
            top.to_value(),
            json!({"entities": {"a": {"title": "A2", "x": 1}, "b": {"title": "B"}}})
        );
        let entities = top.view("entities").unwrap();
        assert_eq!(entities.uri(), "top.yaml");
        assert_eq!(entities.view("a").unwrap().uri_of("x"), Some("base.yaml"));
    }

    #[test]
    fn arrays_union_child_first_without_deep_duplicates() {
        let base = mount(
            "base.yaml",
            1,
            json!({"tags": ["x", {"k": 1, "v": 2}, "z"]}),
            None,
        );
        let top = mount(
            "top.yaml",
            2,
            json!({"tags": ["y", {"v": 2, "k": 1}, "x"]}),
            Some(&base),
        );

        assert_eq!(
            top.get("tags").unwrap().into_value(),
            json!(["y", {"v": 2, "k": 1}, "x", "z"])
        );
    }

    #[test]
    fn arrays_union_across_three_layers() {
        let a = mount("a.yaml", 1, json!({"tags": ["a"]}), None);
        let b = mount("b.yaml", 2, json!({"other": true}), Some(&a));
        let c = mount("c.yaml", 3, json!({"tags": ["c", "a"]}), Some(&b));
        assert_eq!(c.get("tags").unwrap().into_value(), json!(["c", "a"]));

        let d = mount("d.yaml", 4, json!({"tags": ["d"]}), Some(&c));
        assert_eq!(d.get("tags").unwrap().into_value(), json!(["d", "c", "a"]));
    }

    #[test]
    fn child_array_replaces_parent_mapping() {
        let base = mount("base.yaml", 1, json!({"field": {"a": 1}}), None);
        let top = mount("top.yaml", 2, json!({"field": [1, 2]}), Some(&base));
        assert_eq!(top.get("field").unwrap().into_value(), json!([1, 2]));
    }

    #[test]
    fn child_mapping_replaces_parent_scalar() {
        let base = mount("base.yaml", 1, json!({"field": "text"}), None);
        let top = mount("top.yaml", 2, json!({"field": {"a": 1}}), Some(&base));
        let view = top.view("field").unwrap();
        assert!(view.parent().is_none());
        assert_eq!(top.to_value(), json!({"field": {"a": 1}}));
    }

    #[test]
    fn keys_list_own_fields_first() {
        let base = mount("base.yaml", 1, json!({"a": 1, "b": 2}), None);
        let top = mount("top.yaml", 2, json!({"c": 3, "a": 4}), Some(&base));
        assert_eq!(top.keys(), vec!["c", "a", "b"]);
        assert_eq!(top.own_keys().collect::<Vec<_>>(), vec!["c", "a"]);
        assert_eq!(top.depth(), 2);
    }

    #[test]
    fn remount_with_same_revision_and_parent_is_reused() {
        let uri: Arc<str> = Arc::from("a.yaml");
        let content = object(json!({"nested": {"x": 1}}));
        let first = MergeView::mount(&uri, 7, &content, None, None);
        let second = MergeView::mount(&uri, 7, &content, None, Some(&first));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remount_over_new_parent_reuses_untouched_nested_views() {
        let base_v1 = mount("base.yaml", 1, json!({"title": "v1"}), None);
        let uri: Arc<str> = Arc::from("top.yaml");
        let content = object(json!({"docs": {"x": 1}, "title": "top"}));
        let top_v1 = MergeView::mount(&uri, 5, &content, Some(&base_v1), None);

        // Base changes, but not under `docs`: the nested view keeps its identity
        let base_v2 = mount("base.yaml", 2, json!({"title": "v2"}), None);
        let top_v2 = MergeView::mount(&uri, 5, &content, Some(&base_v2), Some(&top_v1));

        assert!(!Arc::ptr_eq(&top_v1, &top_v2));
        assert!(Arc::ptr_eq(
            &top_v1.view("docs").unwrap(),
            &top_v2.view("docs").unwrap()
        ));
    }

    #[test]
    fn changed_revision_rebuilds_nodes() {
        let uri: Arc<str> = Arc::from("a.yaml");
        let v1 = MergeView::mount(&uri, 1, &object(json!({"docs": {"x": 1}})), None, None);
        let v2 = MergeView::mount(&uri, 2, &object(json!({"docs": {"x": 2}})), None, Some(&v1));
        assert!(!Arc::ptr_eq(&v1.view("docs").unwrap(), &v2.view("docs").unwrap()));
        assert_eq!(v2.to_value(), json!({"docs": {"x": 2}}));
    }
}
