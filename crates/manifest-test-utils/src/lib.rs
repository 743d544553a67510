//! Shared test utilities for the manifest-engine workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`source`]: [`MemorySource`], an in-memory loader with request counts,
//!   artificial latency and failure injection
//! - [`listener`]: [`RecordingListener`], which records engine events
//! - [`docs`]: [`TestDocs`], manifest files in a temporary directory

pub mod docs;
pub mod listener;
pub mod source;

pub use docs::TestDocs;
pub use listener::{Event, RecordingListener};
pub use source::MemorySource;
