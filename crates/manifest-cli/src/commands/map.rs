//! Map command implementation

use colored::Colorize;
use manifest_core::Snapshot;
use serde_json::{Map, Value, json};

use crate::error::Result;

/// Print the contributing manifest of every document path under `prefix`
pub fn run_map(snapshot: &Snapshot, prefix: Option<&str>, json: bool) -> Result<()> {
    let prefix = prefix.unwrap_or("");
    let entries: Vec<(&str, &str)> = snapshot
        .merge_map
        .iter()
        .filter(|(path, _)| path.starts_with(prefix))
        .collect();

    if json {
        let mut out = Map::new();
        for (path, uri) in entries {
            out.insert(
                path.to_string(),
                json!({
                    "source": uri,
                    "location": snapshot.merge_map.public_location(path),
                }),
            );
        }
        println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No paths".dimmed());
        return Ok(());
    }
    let width = entries.iter().map(|(path, _)| path.len()).max().unwrap_or(0);
    for (path, uri) in entries {
        println!("{path:<width$}  {}", uri.cyan());
    }
    Ok(())
}
