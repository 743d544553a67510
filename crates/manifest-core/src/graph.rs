//! Layer graph builder
//!
//! Loads layers in breadth-first waves, diffs import slots against the
//! previous generation, and stacks the loaded layers into a chain of
//! [`MergeView`]s while resolving package dependencies.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::content::{SourceData, type_name};
use crate::error::{Error, Problem, Result};
use crate::layer::{LayerId, LayerTree};
use crate::loader::SourceLoader;
use crate::merge::MergeView;
use crate::package::{PackageManifest, PackageRegistry};
use crate::uri::resolve_uri;

/// How children whose URI did not change are treated during a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadMode {
    /// Re-fetch every reachable layer
    Deep,
    /// Re-fetch only the seeded layers and newly bound imports
    Shallow,
}

/// An import slot whose URI was bound elsewhere when it was first seen
#[derive(Debug)]
struct DeferredImport {
    owner: LayerId,
    slot: usize,
    uri: String,
}

/// Result of one stacking pass
#[derive(Debug, Default)]
pub(crate) struct Stacked {
    pub layers: Vec<LayerId>,
    pub top: Option<Arc<MergeView>>,
    pub registry: PackageRegistry,
}

/// Layer state saved before a generation starts
pub(crate) struct Checkpoint {
    tree: LayerTree,
    registry: PackageRegistry,
    roots: Vec<String>,
}

/// The layer tree together with the loader and reserved keys used to grow it
pub(crate) struct LayerGraph {
    pub(crate) tree: LayerTree,
    loader: Arc<dyn SourceLoader>,
    config: EngineConfig,
    /// Registry of the last stacking pass
    registry: PackageRegistry,
}

impl LayerGraph {
    pub(crate) fn new(loader: Arc<dyn SourceLoader>, config: EngineConfig) -> Self {
        Self {
            tree: LayerTree::new(),
            loader,
            config,
            registry: PackageRegistry::new(),
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            tree: self.tree.clone(),
            registry: self.registry.clone(),
            roots: self.config.roots.clone(),
        }
    }

    /// Discard everything a generation changed since `checkpoint`
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.tree.roll_back(checkpoint.tree);
        self.registry = checkpoint.registry;
        self.config.roots = checkpoint.roots;
    }

    /// Declare a root URI; returns false when it is already declared
    pub(crate) fn declare_root(&mut self, uri: &str) -> bool {
        if self.config.roots.iter().any(|root| root == uri) {
            return false;
        }
        self.config.roots.push(uri.to_string());
        true
    }

    /// Forget a declared root and free its layer tree
    pub(crate) fn remove_root(&mut self, uri: &str) -> bool {
        let before = self.config.roots.len();
        self.config.roots.retain(|root| root != uri);
        if let Some(id) = self.root_layer(uri) {
            self.free(id);
        }
        self.config.roots.len() != before
    }

    fn root_layer(&self, uri: &str) -> Option<LayerId> {
        self.tree
            .roots()
            .iter()
            .copied()
            .find(|id| self.tree.get(*id).is_some_and(|layer| layer.uri() == uri))
    }

    fn free(&mut self, id: LayerId) {
        for freed in self.tree.free(id) {
            self.registry.release(freed);
        }
    }

    /// Rebuild the root list from the declared roots and re-fetch everything
    pub(crate) async fn reload_all(&mut self, generation: u64, problems: &mut Vec<Problem>) {
        let mut roots = Vec::new();
        let mut seeds = Vec::new();
        for uri in self.config.roots.clone() {
            match self.root_layer(&uri) {
                Some(id) => {
                    if let Some(layer) = self.tree.get_mut(id) {
                        layer.generation = generation;
                    }
                    roots.push(id);
                    seeds.push(id);
                }
                None => {
                    if let Some(id) = self.bind_root(&uri, generation, problems) {
                        roots.push(id);
                        seeds.push(id);
                    }
                }
            }
        }
        let stale: Vec<LayerId> = self
            .tree
            .roots()
            .iter()
            .copied()
            .filter(|id| !roots.contains(id))
            .collect();
        for id in stale {
            self.free(id);
        }
        self.tree.set_roots(roots);
        self.load(seeds, ReloadMode::Deep, generation, problems).await;
    }

    /// Reachable layers bound to any of `uris`, importers first
    pub(crate) fn changed_layers(&self, uris: &[String]) -> Vec<LayerId> {
        let changed: HashSet<&str> = uris.iter().map(String::as_str).collect();
        self.tree
            .pre_order()
            .into_iter()
            .filter(|id| self.tree.get(*id).is_some_and(|layer| changed.contains(layer.uri())))
            .collect()
    }

    /// Re-fetch `seeds`, keeping the rest of the tree as it is
    pub(crate) async fn reload_layers(
        &mut self,
        seeds: Vec<LayerId>,
        generation: u64,
        problems: &mut Vec<Problem>,
    ) {
        self.tree.touch_reachable(generation);
        self.load(seeds, ReloadMode::Shallow, generation, problems).await;
    }

    /// Bind and load a newly declared root; an existing root is re-fetched
    pub(crate) async fn mount_root(
        &mut self,
        uri: &str,
        generation: u64,
        problems: &mut Vec<Problem>,
    ) {
        self.tree.touch_reachable(generation);
        let seed = match self.root_layer(uri) {
            Some(id) => Some(id),
            None => {
                let id = self.bind_root(uri, generation, problems);
                if let Some(id) = id {
                    let mut roots = self.tree.roots().to_vec();
                    roots.push(id);
                    self.tree.set_roots(roots);
                }
                id
            }
        };
        if let Some(id) = seed {
            self.load(vec![id], ReloadMode::Shallow, generation, problems).await;
        }
    }

    /// Keep the remaining tree alive after a root was removed
    pub(crate) fn confirm(&mut self, generation: u64) {
        self.tree.touch_reachable(generation);
    }

    fn bind_root(&mut self, uri: &str, generation: u64, problems: &mut Vec<Problem>) -> Option<LayerId> {
        if let Some(existing) = self.tree.bound(uri) {
            let in_flight = self
                .tree
                .get(existing)
                .is_some_and(|layer| layer.generation == generation);
            if in_flight {
                let first_owner = self.tree.owner_uri(existing).unwrap_or(uri).to_string();
                problems.push(
                    Problem::new(Error::DuplicateImport {
                        uri: uri.to_string(),
                        first_owner,
                        second_owner: uri.to_string(),
                    })
                    .at(uri),
                );
                return None;
            }
            self.free(existing);
        }
        Some(self.tree.create(uri, None, generation))
    }

    /// Fetch `seeds` and every import they newly bind, one wave at a time.
    ///
    /// Each wave is requested concurrently; results are applied in wave
    /// order so the outcome does not depend on which fetch finished first.
    pub(crate) async fn load(
        &mut self,
        seeds: Vec<LayerId>,
        mode: ReloadMode,
        generation: u64,
        problems: &mut Vec<Problem>,
    ) {
        let mut deferred = Vec::new();
        let mut wave = seeds;
        loop {
            while !wave.is_empty() {
                wave = self.load_wave(wave, mode, generation, problems, &mut deferred).await;
            }
            wave = self.retry_deferred(&mut deferred, generation, problems);
            if wave.is_empty() {
                break;
            }
        }
    }

    async fn load_wave(
        &mut self,
        wave: Vec<LayerId>,
        mode: ReloadMode,
        generation: u64,
        problems: &mut Vec<Problem>,
        deferred: &mut Vec<DeferredImport>,
    ) -> Vec<LayerId> {
        let requests: Vec<(LayerId, Arc<str>, Option<String>)> = wave
            .into_iter()
            .filter_map(|id| {
                let layer = self.tree.get_mut(id)?;
                layer.generation = generation;
                let uri = Arc::clone(&layer.uri);
                let base = self.tree.owner_uri(id).map(str::to_string);
                Some((id, uri, base))
            })
            .collect();
        tracing::debug!(count = requests.len(), generation, "Requesting layer wave");

        let results = join_all(requests.into_iter().map(|(id, uri, base)| {
            let loader = Arc::clone(&self.loader);
            async move {
                let result = loader.request(&uri, base.as_deref()).await;
                (id, uri, result)
            }
        }))
        .await;

        let mut next = Vec::new();
        for (id, uri, result) in results {
            let current = self.tree.get(id).map(|layer| Arc::clone(&layer.uri));
            if current.as_deref() != Some(&*uri) {
                tracing::debug!(%id, %uri, "Discarding result for a layer freed during load");
                continue;
            }
            next.extend(self.apply(id, &uri, result, mode, generation, problems, deferred));
        }
        next
    }

    /// Store a fetch result on its layer and bind the declared imports
    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        id: LayerId,
        uri: &str,
        result: Result<SourceData>,
        mode: ReloadMode,
        generation: u64,
        problems: &mut Vec<Problem>,
        deferred: &mut Vec<DeferredImport>,
    ) -> Vec<LayerId> {
        if let Some(layer) = self.tree.get_mut(id) {
            layer.loads += 1;
        }
        let content = match result.and_then(|data| data.into_content(uri)) {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(%uri, %error, "Failed to load manifest layer");
                problems.push(Problem::new(error).at(uri));
                self.tree.set_content(id, None);
                if let Some(layer) = self.tree.get_mut(id) {
                    layer.failed = true;
                    layer.packages = PackageManifest::default();
                }
                for freed in self.tree.free_imports(id) {
                    self.registry.release(freed);
                }
                return Vec::new();
            }
        };

        let (packages, errors) = PackageManifest::from_block(
            content.as_ref().and_then(|c| c.get(&self.config.package_key)),
            uri,
        );
        problems.extend(errors.into_iter().map(|e| Problem::new(e).at(uri)));
        let declared = content
            .as_ref()
            .map(|c| self.import_declarations(c, uri, problems))
            .unwrap_or_default();

        if self.tree.set_content(id, content) {
            tracing::debug!(%uri, "Layer content changed");
        }
        if let Some(layer) = self.tree.get_mut(id) {
            layer.failed = false;
            layer.packages = packages;
        }
        self.bind_imports(id, declared, mode, generation, problems, deferred)
    }

    /// Resolved URIs of the `imports` list, index-aligned; bad entries are `None`
    fn import_declarations(&self, content: &Value, uri: &str, problems: &mut Vec<Problem>) -> Vec<Option<String>> {
        let key = &self.config.imports_key;
        match content.get(key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let resolved = item.as_str().and_then(|reference| resolve_uri(reference, Some(uri)));
                    if resolved.is_none() {
                        problems.push(
                            Problem::new(Error::syntax(
                                uri,
                                format!("{key}[{index}] must be a non-empty string, found {}", type_name(item)),
                            ))
                            .at(uri),
                        );
                    }
                    resolved
                })
                .collect(),
            Some(other) => {
                problems.push(
                    Problem::new(Error::syntax(
                        uri,
                        format!("'{key}' must be a list, found {}", type_name(other)),
                    ))
                    .at(uri),
                );
                Vec::new()
            }
        }
    }

    /// Diff the declared imports against the layer's current slots.
    ///
    /// Slots whose URI changed are freed first so a URI moving between
    /// slots is not mistaken for a duplicate. Returns the layers to fetch.
    fn bind_imports(
        &mut self,
        id: LayerId,
        declared: Vec<Option<String>>,
        mode: ReloadMode,
        generation: u64,
        problems: &mut Vec<Problem>,
        deferred: &mut Vec<DeferredImport>,
    ) -> Vec<LayerId> {
        let (mut previous, previous_uris) = match self.tree.get_mut(id) {
            Some(layer) => (
                std::mem::take(&mut layer.imports),
                std::mem::take(&mut layer.import_uris),
            ),
            None => return Vec::new(),
        };

        for (slot, child) in previous.iter_mut().enumerate() {
            let keep = matches!(
                (declared.get(slot), previous_uris.get(slot)),
                (Some(Some(new)), Some(Some(old))) if new == old
            );
            if !keep && let Some(freed) = child.take() {
                self.free(freed);
            }
        }

        let mut to_load = Vec::new();
        let mut imports = Vec::with_capacity(declared.len());
        for (slot, uri) in declared.iter().enumerate() {
            let Some(uri) = uri else {
                imports.push(None);
                continue;
            };
            let kept = previous
                .get(slot)
                .copied()
                .flatten()
                .filter(|child| self.tree.get(*child).is_some());
            if let Some(child) = kept {
                if let Some(layer) = self.tree.get_mut(child) {
                    layer.generation = generation;
                }
                if mode == ReloadMode::Deep {
                    to_load.push(child);
                }
                imports.push(Some(child));
                continue;
            }
            imports.push(self.bind_child(id, slot, uri, generation, problems, deferred));
            to_load.extend(imports.last().copied().flatten());
        }

        if let Some(layer) = self.tree.get_mut(id) {
            layer.imports = imports;
            layer.import_uris = declared;
        }
        to_load
    }

    fn bind_child(
        &mut self,
        owner: LayerId,
        slot: usize,
        uri: &str,
        generation: u64,
        problems: &mut Vec<Problem>,
        deferred: &mut Vec<DeferredImport>,
    ) -> Option<LayerId> {
        let lineage = self.tree.lineage(owner);
        if lineage.iter().any(|ancestor| ancestor == uri) {
            let mut chain = lineage;
            chain.push(uri.to_string());
            let owner_uri = self.tree.get(owner).map(|l| l.uri().to_string()).unwrap_or_default();
            tracing::warn!(%uri, "Import cycle detected");
            problems.push(
                Problem::new(Error::ImportCycle {
                    uri: uri.to_string(),
                    chain,
                })
                .at(owner_uri),
            );
            return None;
        }

        if self.tree.bound(uri).is_some() {
            // Settled once every wave has run: the current holder either
            // keeps the URI or drops it during its own reload.
            deferred.push(DeferredImport {
                owner,
                slot,
                uri: uri.to_string(),
            });
            return None;
        }

        Some(self.tree.create(uri, Some(owner), generation))
    }

    /// Bind deferred imports whose URI is no longer held this generation.
    ///
    /// A URI still held by a layer confirmed in `generation` is a duplicate;
    /// one held by a layer nothing confirmed is taken over.
    fn retry_deferred(
        &mut self,
        deferred: &mut Vec<DeferredImport>,
        generation: u64,
        problems: &mut Vec<Problem>,
    ) -> Vec<LayerId> {
        let mut seeds = Vec::new();
        for entry in std::mem::take(deferred) {
            let slot_open = self.tree.get(entry.owner).is_some_and(|layer| {
                layer.import_uris.get(entry.slot).and_then(Option::as_deref) == Some(entry.uri.as_str())
                    && layer.imports.get(entry.slot).is_some_and(Option::is_none)
            });
            if !slot_open {
                continue;
            }
            if let Some(existing) = self.tree.bound(&entry.uri) {
                let confirmed = self
                    .tree
                    .get(existing)
                    .is_some_and(|layer| layer.generation == generation);
                if confirmed {
                    let first_owner = self.tree.owner_uri(existing).unwrap_or(&entry.uri).to_string();
                    let second_owner = self
                        .tree
                        .get(entry.owner)
                        .map(|layer| layer.uri().to_string())
                        .unwrap_or_default();
                    tracing::warn!(uri = %entry.uri, %first_owner, %second_owner, "Duplicate import");
                    problems.push(
                        Problem::new(Error::DuplicateImport {
                            uri: entry.uri,
                            first_owner,
                            second_owner: second_owner.clone(),
                        })
                        .at(second_owner),
                    );
                    continue;
                }
                self.free(existing);
            }
            let child = self.tree.create(&entry.uri, Some(entry.owner), generation);
            if let Some(slot) = self
                .tree
                .get_mut(entry.owner)
                .and_then(|layer| layer.imports.get_mut(entry.slot))
            {
                *slot = Some(child);
            }
            seeds.push(child);
        }
        seeds
    }

    /// Free layers that were not confirmed in `generation`
    pub(crate) fn sweep(&mut self, generation: u64) {
        for freed in self.tree.sweep(generation) {
            self.registry.release(freed);
        }
    }

    /// Stack every loaded layer, imports first, into a chain of views.
    ///
    /// A layer whose dependencies are not yet declared waits as a captive
    /// and is mounted as soon as a later layer declares a satisfying
    /// version. Layers still waiting at the end are reported.
    pub(crate) fn stack(&mut self, problems: &mut Vec<Problem>) -> Stacked {
        let mut stacked = Stacked::default();
        for id in self.tree.post_order() {
            self.mount(id, &mut stacked, problems);
        }

        for (package, captive) in stacked.registry.take_captives() {
            let uri = self
                .tree
                .get(captive.layer)
                .map(|layer| layer.uri().to_string())
                .unwrap_or_default();
            let error = match stacked.registry.version_of(&package) {
                Some(found) => Error::VersionConflict {
                    package,
                    uri: uri.clone(),
                    found: found.to_string(),
                    expected: captive.requirement.to_string(),
                },
                None => Error::UnresolvedDependency {
                    package,
                    requirement: captive.requirement.to_string(),
                    uri: uri.clone(),
                },
            };
            tracing::warn!(%uri, %error, "Layer left unmounted");
            problems.push(Problem::new(error).at(uri));
        }

        let mounted: HashSet<LayerId> = stacked.layers.iter().copied().collect();
        let ids: Vec<LayerId> = self.tree.iter().map(|layer| layer.id()).collect();
        for id in ids {
            if !mounted.contains(&id)
                && let Some(layer) = self.tree.get_mut(id)
            {
                layer.view = None;
            }
        }

        self.registry = std::mem::take(&mut stacked.registry);
        for (id, accepted) in self.registry.packages() {
            tracing::debug!(package = %id, version = %accepted.version, uri = %accepted.uri, "Package accepted");
        }
        stacked
    }

    fn mount(&mut self, id: LayerId, stacked: &mut Stacked, problems: &mut Vec<Problem>) {
        let mut queue = VecDeque::from([id]);
        while let Some(id) = queue.pop_front() {
            let Some(layer) = self.tree.get(id) else {
                continue;
            };
            let Some(content) = layer.content.clone() else {
                continue;
            };
            let uri = Arc::clone(&layer.uri);
            let packages = layer.packages.clone();

            let satisfied = packages
                .requirements()
                .all(|dep| stacked.registry.require(&dep.package, &dep.requirement, id));
            if !satisfied {
                tracing::debug!(%uri, "Layer waiting on a dependency");
                continue;
            }

            let conflict = packages
                .declarations
                .iter()
                .find_map(|decl| stacked.registry.check_declaration(&decl.id, &decl.version, &uri).err());
            if let Some(error) = conflict {
                tracing::warn!(%uri, %error, "Layer rejected");
                problems.push(Problem::new(error).at(&*uri));
                continue;
            }

            let Value::Object(fields) = &*content else {
                problems.push(Problem::new(Error::core(format!("layer {uri} holds a non-mapping document"))).at(&*uri));
                continue;
            };
            let Some(layer) = self.tree.get_mut(id) else {
                continue;
            };
            let view = MergeView::mount(&uri, layer.revision, fields, stacked.top.as_ref(), layer.view.as_ref());
            layer.view = Some(Arc::clone(&view));
            stacked.top = Some(view);
            stacked.layers.push(id);
            tracing::debug!(%uri, depth = stacked.layers.len(), "Layer mounted");

            for decl in packages.declarations {
                let released = match stacked.registry.declare(&decl.id, decl.version.clone(), id, &uri) {
                    Ok(released) => released,
                    Err(error) => {
                        problems.push(Problem::new(error).at(&*uri));
                        continue;
                    }
                };
                for captive in released {
                    if captive.requirement.matches(&decl.version) {
                        queue.push_back(captive.layer);
                        continue;
                    }
                    let captive_uri = self
                        .tree
                        .get(captive.layer)
                        .map(|layer| layer.uri().to_string())
                        .unwrap_or_default();
                    problems.push(
                        Problem::new(Error::VersionConflict {
                            package: decl.id.clone(),
                            uri: captive_uri.clone(),
                            found: decl.version.to_string(),
                            expected: captive.requirement.to_string(),
                        })
                        .at(captive_uri),
                    );
                }
            }
        }
    }

    /// URIs of the declared roots that produced no content, plus whether any did
    pub(crate) fn root_status(&self) -> (bool, Vec<String>) {
        let mut any_content = false;
        let mut failed = Vec::new();
        for root in &self.config.roots {
            match self.root_layer(root).and_then(|id| self.tree.get(id)) {
                Some(layer) if layer.content.is_some() => any_content = true,
                Some(layer) if !layer.failed => {}
                _ => failed.push(root.clone()),
            }
        }
        (any_content, failed)
    }
}
