//! Engine setup from command-line options
//!
//! The configuration file is `--config` when given, else `manifest.toml` in
//! the source directory when it exists, else the defaults. `--root`
//! arguments are appended to the configured roots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use manifest_core::{Engine, EngineConfig, FsSourceLoader};

use crate::error::{CliError, Result};

pub const DEFAULT_CONFIG: &str = "manifest.toml";

/// Read the engine configuration for `dir`
pub fn load_config(dir: &Path, config: Option<&Path>, roots: &[String]) -> Result<EngineConfig> {
    let path: Option<PathBuf> = match config {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let candidate = dir.join(DEFAULT_CONFIG);
            candidate.is_file().then_some(candidate)
        }
    };

    let mut config = match path {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    for root in roots {
        config = config.with_root(root.clone());
    }

    if config.roots.is_empty() {
        return Err(CliError::user(format!(
            "No root manifest configured; pass --root or list roots in {DEFAULT_CONFIG}"
        )));
    }
    Ok(config)
}

/// Build an engine over `dir` and load the first generation
pub async fn open(dir: &Path, config: EngineConfig) -> Result<Engine> {
    let loader = Arc::new(FsSourceLoader::new(dir));
    let engine = Engine::new(config, loader);
    engine.full_reload().await?;
    Ok(engine)
}
