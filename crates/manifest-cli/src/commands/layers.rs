//! Layers command implementation

use colored::Colorize;
use manifest_core::Engine;

use crate::error::Result;

/// List every reachable layer with its load bookkeeping
pub async fn run_layers(engine: &Engine, json: bool) -> Result<()> {
    let layers = engine.layers().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&layers)?);
        return Ok(());
    }

    for layer in layers {
        let status = if layer.failed {
            "failed".red()
        } else if layer.mounted {
            "mounted".green()
        } else {
            "not mounted".yellow()
        };
        println!(
            "{} {} (revision {}, loads {})",
            layer.uri.cyan(),
            status,
            layer.revision,
            layer.loads
        );
        for import in layer.imports.iter().flatten() {
            println!("  {} {}", "->".dimmed(), import);
        }
    }
    Ok(())
}
