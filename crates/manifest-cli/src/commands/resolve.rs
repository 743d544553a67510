//! Resolve command implementation

use manifest_core::Snapshot;

use super::print_problems;
use crate::error::{CliError, Result};

/// Print the merged document, or the subtree at `path`
pub fn run_resolve(snapshot: &Snapshot, path: Option<&str>, json: bool) -> Result<()> {
    print_problems(&snapshot.problems);

    let value = match path {
        Some(path) => snapshot
            .get(path)
            .ok_or_else(|| CliError::user(format!("No value at {path}")))?,
        None => &*snapshot.document,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", serde_yaml::to_string(value)?);
    }
    Ok(())
}
