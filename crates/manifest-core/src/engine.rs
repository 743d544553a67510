//! The manifest engine
//!
//! [`Engine`] owns the layer graph and publishes a new [`Snapshot`] for
//! every completed generation. Reloads are serialized: a call made while
//! another is running waits for it, and a full reload requested while
//! older requests are still waiting makes those requests obsolete.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::{Error, Problem, Result};
use crate::graph::{LayerGraph, Stacked};
use crate::inherit::InheritanceExpander;
use crate::layer::LayerInfo;
use crate::loader::SourceLoader;
use crate::merge::MergeMap;
use crate::snapshot::{Publisher, Snapshot, content_hash};

/// Receives engine lifecycle events.
///
/// Callbacks run on the reloading task and should return quickly.
pub trait ChangeListener: Send + Sync {
    /// A generation started loading
    fn on_start_reload(&self) {}

    /// A generation was published
    fn on_reloaded(&self, _snapshot: &Snapshot) {}

    /// A problem was recorded while building a generation
    fn on_error(&self, _problem: &Problem) {}
}

/// What a reload request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A snapshot with this generation was published
    Published(u64),
    /// Nothing matched the request; no generation was started
    Unchanged,
    /// A newer full reload made this request obsolete
    Superseded,
}

enum Job<'a> {
    Full,
    Changed(&'a [String]),
    Import(&'a str),
    Unmount(&'a str),
}

/// Loads, merges and publishes a layered manifest
pub struct Engine {
    graph: Mutex<LayerGraph>,
    publisher: Publisher,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    expander: InheritanceExpander,
    map_prefix: String,
    /// Last generation handed out
    generation: AtomicU64,
    /// Request tickets, in call order
    tickets: AtomicU64,
    /// Ticket of the newest full reload request
    latest_full: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig, loader: Arc<dyn SourceLoader>) -> Self {
        let mut roots = Vec::new();
        for root in &config.roots {
            if !roots.contains(root) {
                roots.push(root.clone());
            }
        }
        let config = EngineConfig { roots, ..config };
        Self {
            expander: InheritanceExpander::new(&config.entities_key, &config.prototype_key),
            map_prefix: config.map_prefix.clone(),
            graph: Mutex::new(LayerGraph::new(loader, config)),
            publisher: Publisher::new(),
            listeners: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            tickets: AtomicU64::new(0),
            latest_full: AtomicU64::new(0),
        }
    }

    pub fn with_listener(self, listener: Arc<dyn ChangeListener>) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// The most recently published snapshot
    pub fn published(&self) -> Arc<Snapshot> {
        self.publisher.current()
    }

    /// Generation of the published snapshot; 0 before the first publish
    pub fn generation(&self) -> u64 {
        self.published().generation
    }

    /// Declared root URIs
    pub async fn roots(&self) -> Vec<String> {
        self.graph.lock().await.config().roots.clone()
    }

    /// Bookkeeping of the layer currently bound to `uri`
    pub async fn layer(&self, uri: &str) -> Option<LayerInfo> {
        let graph = self.graph.lock().await;
        graph.tree.bound(uri).and_then(|id| graph.tree.info(id))
    }

    /// Every reachable layer, importers before their imports
    pub async fn layers(&self) -> Vec<LayerInfo> {
        let graph = self.graph.lock().await;
        graph
            .tree
            .pre_order()
            .into_iter()
            .filter_map(|id| graph.tree.info(id))
            .collect()
    }

    /// Re-fetch every layer reachable from the declared roots
    pub async fn full_reload(&self) -> Result<ReloadOutcome> {
        let ticket = self.ticket();
        self.latest_full.fetch_max(ticket, Ordering::SeqCst);
        self.run(Job::Full, Some(ticket)).await
    }

    /// Re-fetch only the layers bound to the given URIs.
    ///
    /// Returns [`ReloadOutcome::Unchanged`] without starting a generation
    /// when none of the URIs is currently loaded.
    pub async fn on_change<I, S>(&self, uris: I) -> Result<ReloadOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        let ticket = self.ticket();
        self.run(Job::Changed(&uris), Some(ticket)).await
    }

    /// Declare an additional root (e.g. a plugin manifest) and load it
    pub async fn import(&self, uri: &str) -> Result<ReloadOutcome> {
        self.ticket();
        self.run(Job::Import(uri), None).await
    }

    /// Remove a declared root and everything only it imported
    pub async fn unmount(&self, uri: &str) -> Result<ReloadOutcome> {
        self.ticket();
        self.run(Job::Unmount(uri), None).await
    }

    fn ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn listeners(&self) -> Vec<Arc<dyn ChangeListener>> {
        match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn run(&self, job: Job<'_>, ticket: Option<u64>) -> Result<ReloadOutcome> {
        let mut graph = self.graph.lock().await;
        if let Some(ticket) = ticket
            && self.latest_full.load(Ordering::SeqCst) > ticket
        {
            tracing::debug!(ticket, "Request superseded by a newer full reload");
            return Ok(ReloadOutcome::Superseded);
        }

        let checkpoint = graph.checkpoint();
        let seeds = match &job {
            Job::Changed(uris) => {
                let seeds = graph.changed_layers(uris);
                if seeds.is_empty() {
                    tracing::debug!(?uris, "No loaded layer matches the changed URIs");
                    return Ok(ReloadOutcome::Unchanged);
                }
                seeds
            }
            Job::Unmount(uri) => {
                if !graph.remove_root(uri) {
                    tracing::debug!(%uri, "Not a declared root");
                    return Ok(ReloadOutcome::Unchanged);
                }
                Vec::new()
            }
            _ => Vec::new(),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "Reloading manifest");
        let listeners = self.listeners();
        for listener in &listeners {
            listener.on_start_reload();
        }

        let mut problems = Vec::new();
        match job {
            Job::Full => graph.reload_all(generation, &mut problems).await,
            Job::Changed(_) => graph.reload_layers(seeds, generation, &mut problems).await,
            Job::Import(uri) => {
                graph.declare_root(uri);
                graph.mount_root(uri, generation, &mut problems).await;
            }
            Job::Unmount(_) => graph.confirm(generation),
        }
        graph.sweep(generation);
        let stacked = graph.stack(&mut problems);

        for problem in &problems {
            tracing::warn!(kind = %problem.kind, uri = ?problem.uri, "{}", problem.error);
            for listener in &listeners {
                listener.on_error(problem);
            }
        }

        let (any_content, failed) = graph.root_status();
        if !any_content && !failed.is_empty() {
            tracing::error!(generation, ?failed, "No root manifest could be loaded");
            graph.restore(checkpoint);
            return Err(Error::RootUnavailable { uris: failed });
        }

        let snapshot = self.snapshot(&graph, generation, stacked, problems);
        drop(graph);
        tracing::info!(
            generation,
            layers = snapshot.stack.len(),
            problems = snapshot.problems.len(),
            hash = %snapshot.hash,
            "Manifest reloaded"
        );
        if !self.publisher.publish(snapshot) {
            return Ok(ReloadOutcome::Superseded);
        }

        let published = self.publisher.current();
        for listener in &listeners {
            listener.on_reloaded(&published);
        }
        Ok(ReloadOutcome::Published(generation))
    }

    fn snapshot(&self, graph: &LayerGraph, generation: u64, stacked: Stacked, problems: Vec<Problem>) -> Snapshot {
        let mut document = stacked
            .top
            .as_ref()
            .map(|view| view.to_value())
            .unwrap_or_else(|| Value::Object(Map::new()));
        let expansion = self.expander.expand(&mut document);
        tracing::debug!(expanded = expansion.expanded, "Entity inheritance expanded");

        let mut merge_map = match &stacked.top {
            Some(view) => MergeMap::build(view, &self.map_prefix),
            None => MergeMap::default(),
        };
        for inherited in &expansion.inherited {
            let section = format!("/{}", inherited.section);
            merge_map.alias(
                &format!("{section}/{}/{}", inherited.entity, inherited.field),
                &format!("{section}/{}/{}", inherited.origin, inherited.field),
            );
        }
        let stack = stacked
            .layers
            .iter()
            .filter_map(|id| graph.tree.get(*id))
            .map(|layer| layer.uri().to_string())
            .collect();
        let packages = graph
            .registry()
            .packages()
            .map(|(id, accepted)| (id.to_string(), accepted.version.clone()))
            .collect();

        Snapshot {
            generation,
            hash: content_hash(&document),
            document: Arc::new(document),
            view: stacked.top,
            merge_map,
            problems,
            stack,
            packages,
        }
    }
}
