//! Check command implementation

use colored::Colorize;
use manifest_core::Snapshot;
use serde_json::json;

use super::print_problems;
use crate::error::{CliError, Result};

/// Report problems of the loaded generation; any problem is an error
pub fn run_check(snapshot: &Snapshot, json: bool) -> Result<()> {
    if json {
        let report = json!({
            "generation": snapshot.generation,
            "hash": snapshot.hash,
            "layers": snapshot.stack,
            "packages": snapshot.packages,
            "problems": snapshot.problems,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_problems(&snapshot.problems);
        println!(
            "{} {} layers, {} packages",
            "Loaded".bold(),
            snapshot.stack.len(),
            snapshot.packages.len()
        );
        for (id, version) in &snapshot.packages {
            println!("  {} {} {}", "+".green(), id.cyan(), version);
        }
        println!("{}:   {}", "Hash".dimmed(), snapshot.hash);
    }

    match snapshot.problems.len() {
        0 => {
            if !json {
                println!("{}", "No problems found".green());
            }
            Ok(())
        }
        n => Err(CliError::user(format!("{n} problem(s) found"))),
    }
}
