//! Layers: one loaded manifest fragment plus its resolved imports
//!
//! Layers live in a [`LayerTree`] arena and refer to each other by
//! [`LayerId`]. Ids are never reused, so a stale id simply stops resolving
//! once its layer has been freed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::merge::MergeView;
use crate::package::PackageManifest;

/// Identity of a layer within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LayerId(u64);

impl LayerId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Loaded state of one manifest fragment
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) uri: Arc<str>,
    pub(crate) parent: Option<LayerId>,
    /// Fragment as loaded; `None` when empty or failed
    pub(crate) content: Option<Arc<Value>>,
    pub(crate) packages: PackageManifest,
    /// Resolved import URIs, index-aligned with the `imports` declaration
    pub(crate) import_uris: Vec<Option<String>>,
    /// Child layers bound to each import slot
    pub(crate) imports: Vec<Option<LayerId>>,
    /// Generation in which the layer was last (re)loaded or confirmed
    pub(crate) generation: u64,
    /// Content revision; changes only when loaded content differs
    pub(crate) revision: u64,
    pub(crate) loads: u64,
    pub(crate) failed: bool,
    /// View produced when the layer was last mounted
    pub(crate) view: Option<Arc<MergeView>>,
}

impl Layer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_deref()
    }

    pub fn view(&self) -> Option<&Arc<MergeView>> {
        self.view.as_ref()
    }
}

/// Read-only snapshot of a layer's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub id: LayerId,
    pub uri: String,
    pub parent: Option<String>,
    pub generation: u64,
    pub revision: u64,
    /// How many times the layer's source was fetched
    pub loads: u64,
    pub imports: Vec<Option<String>>,
    pub mounted: bool,
    pub failed: bool,
}

/// Arena of layers, the root list and the URI binding table
#[derive(Debug, Clone, Default)]
pub struct LayerTree {
    layers: HashMap<LayerId, Layer>,
    bindings: HashMap<String, LayerId>,
    roots: Vec<LayerId>,
    next_id: u64,
    next_revision: u64,
}

impl LayerTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a layer for `uri` and bind the URI to it
    pub(crate) fn create(&mut self, uri: &str, parent: Option<LayerId>, generation: u64) -> LayerId {
        self.next_id += 1;
        let id = LayerId(self.next_id);
        tracing::debug!(%id, %uri, ?parent, generation, "Layer created");
        self.layers.insert(
            id,
            Layer {
                id,
                uri: Arc::from(uri),
                parent,
                content: None,
                packages: PackageManifest::default(),
                import_uris: Vec::new(),
                imports: Vec::new(),
                generation,
                revision: 0,
                loads: 0,
                failed: false,
                view: None,
            },
        );
        self.bindings.insert(uri.to_string(), id);
        id
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer currently bound to `uri`
    pub fn bound(&self, uri: &str) -> Option<LayerId> {
        self.bindings.get(uri).copied()
    }

    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    pub(crate) fn set_roots(&mut self, roots: Vec<LayerId>) {
        self.roots = roots;
    }

    /// Store freshly loaded content.
    ///
    /// Content deep-equal to what the layer already holds keeps its
    /// revision (and its `Arc`), so views built from it stay reusable.
    /// Returns whether the revision changed.
    pub(crate) fn set_content(&mut self, id: LayerId, content: Option<Value>) -> bool {
        let Some(layer) = self.layers.get_mut(&id) else {
            return false;
        };
        if layer.content.as_deref() == content.as_ref() {
            return false;
        }
        self.next_revision += 1;
        layer.revision = self.next_revision;
        layer.content = content.map(Arc::new);
        true
    }

    /// Free a layer and everything it imports, children first.
    ///
    /// Returns the freed ids in release order.
    pub(crate) fn free(&mut self, id: LayerId) -> Vec<LayerId> {
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            let Some(layer) = self.layers.get(&current) else {
                continue;
            };
            stack.push((current, true));
            for child in layer.imports.iter().rev().flatten() {
                stack.push((*child, false));
            }
        }

        for freed in &order {
            if let Some(layer) = self.layers.remove(freed) {
                tracing::debug!(id = %freed, uri = %layer.uri, "Layer freed");
                if self.bindings.get(&*layer.uri) == Some(freed) {
                    self.bindings.remove(&*layer.uri);
                }
            }
        }
        self.roots.retain(|root| !order.contains(root));
        order
    }

    /// Free every import of `id`, leaving the layer itself in place
    pub(crate) fn free_imports(&mut self, id: LayerId) -> Vec<LayerId> {
        let children: Vec<LayerId> = match self.layers.get_mut(&id) {
            Some(layer) => {
                layer.import_uris.clear();
                std::mem::take(&mut layer.imports).into_iter().flatten().collect()
            }
            None => return Vec::new(),
        };
        children.into_iter().flat_map(|child| self.free(child)).collect()
    }

    /// URIs from the root down to `id`, inclusive
    pub fn lineage(&self, id: LayerId) -> Vec<String> {
        let mut chain: Vec<String> =
            std::iter::successors(self.layers.get(&id), |layer| {
                layer.parent.and_then(|p| self.layers.get(&p))
            })
            .map(|layer| layer.uri.to_string())
            .collect();
        chain.reverse();
        chain
    }

    /// URI of the layer that imports `id`, if any
    pub fn owner_uri(&self, id: LayerId) -> Option<&str> {
        let parent = self.layers.get(&id)?.parent?;
        self.layers.get(&parent).map(Layer::uri)
    }

    /// Layers reachable from the roots, imports before their importer
    pub fn post_order(&self) -> Vec<LayerId> {
        let mut order = Vec::with_capacity(self.layers.len());
        let mut stack: Vec<(LayerId, bool)> =
            self.roots.iter().rev().map(|root| (*root, false)).collect();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            let Some(layer) = self.layers.get(&id) else {
                continue;
            };
            stack.push((id, true));
            for child in layer.imports.iter().rev().flatten() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Layers reachable from the roots, importer before its imports
    pub fn pre_order(&self) -> Vec<LayerId> {
        let mut order = Vec::with_capacity(self.layers.len());
        let mut stack: Vec<LayerId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(layer) = self.layers.get(&id) else {
                continue;
            };
            order.push(id);
            stack.extend(layer.imports.iter().rev().flatten());
        }
        order
    }

    /// Stamp every reachable layer with `generation`
    pub(crate) fn touch_reachable(&mut self, generation: u64) {
        for id in self.pre_order() {
            if let Some(layer) = self.layers.get_mut(&id) {
                layer.generation = generation;
            }
        }
    }

    /// Free layers not touched in `generation`
    pub(crate) fn sweep(&mut self, generation: u64) -> Vec<LayerId> {
        let reachable: HashSet<LayerId> = self.pre_order().into_iter().collect();
        let orphans: Vec<LayerId> = self
            .layers
            .values()
            .filter(|layer| layer.generation != generation || !reachable.contains(&layer.id))
            .map(|layer| layer.id)
            .collect();
        let mut freed = Vec::new();
        for id in orphans {
            freed.extend(self.free(id));
        }
        if !freed.is_empty() {
            tracing::debug!(count = freed.len(), generation, "Swept orphaned layers");
        }
        freed
    }

    pub fn info(&self, id: LayerId) -> Option<LayerInfo> {
        let layer = self.layers.get(&id)?;
        Some(LayerInfo {
            id,
            uri: layer.uri.to_string(),
            parent: self.owner_uri(id).map(str::to_string),
            generation: layer.generation,
            revision: layer.revision,
            loads: layer.loads,
            imports: layer.import_uris.clone(),
            mounted: layer.view.is_some(),
            failed: layer.failed,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Replace the tree with an earlier copy of itself.
    ///
    /// Id and revision counters keep counting from the current values.
    pub(crate) fn roll_back(&mut self, saved: LayerTree) {
        let next_id = self.next_id.max(saved.next_id);
        let next_revision = self.next_revision.max(saved.next_revision);
        *self = saved;
        self.next_id = next_id;
        self.next_revision = next_revision;
    }
}
