//! Manifest resolution engine
//!
//! Assembles one merged document from a tree of manifest fragments that
//! import each other, and keeps it current as fragments change:
//!
//! - **Layers**: every fragment is a layer; a layer's imports sit below it
//! - **Merge views**: layers stack into a chain of lazily merged views where
//!   upper layers override lower ones and arrays are unioned
//! - **Packages**: fragments may declare packages and version-ranged
//!   dependencies; a fragment waits until its dependencies are declared
//! - **Incremental reload**: only changed fragments are re-fetched, and
//!   unchanged views are shared between generations
//! - **Inheritance**: entities may name a `$prototype` sibling to fill
//!   missing fields from
//!
//! # Architecture
//!
//! ```text
//!                       Engine
//!                          |
//!        +-----------+-----+------+-------------+
//!        |           |            |             |
//!   LayerGraph  PackageRegistry  MergeView  InheritanceExpander
//!        |
//!   SourceLoader (FsSourceLoader, ...)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use manifest_core::{Engine, EngineConfig, FsSourceLoader};
//!
//! async fn example() -> manifest_core::Result<()> {
//!     let config = EngineConfig::default().with_root("/root.yaml");
//!     let engine = Engine::new(config, Arc::new(FsSourceLoader::new("docs")));
//!     engine.full_reload().await?;
//!     println!("{}", engine.published().document);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod engine;
pub mod error;
mod graph;
pub mod inherit;
pub mod layer;
pub mod loader;
pub mod merge;
pub mod package;
pub mod snapshot;
pub mod uri;

pub use config::EngineConfig;
pub use content::{Format, SourceData};
pub use engine::{ChangeListener, Engine, ReloadOutcome};
pub use error::{Error, Problem, ProblemKind, Result};
pub use inherit::{Expansion, InheritanceExpander, InheritedField};
pub use layer::{LayerId, LayerInfo};
pub use loader::{FsSourceLoader, SourceLoader};
pub use merge::{MergeMap, MergeView, Node, path_key};
pub use package::{PackageManifest, PackageRegistry, Requirement};
pub use snapshot::{Snapshot, content_hash};
pub use uri::resolve_uri;
