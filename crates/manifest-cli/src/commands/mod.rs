//! Command implementations for manifest-cli

pub mod check;
pub mod layers;
pub mod map;
pub mod resolve;

pub use check::run_check;
pub use layers::run_layers;
pub use map::run_map;
pub use resolve::run_resolve;

use colored::Colorize;
use manifest_core::Problem;

/// Print problems to stderr, one per line
pub(crate) fn print_problems(problems: &[Problem]) {
    for problem in problems {
        let location = problem.uri.as_deref().unwrap_or("-");
        eprintln!(
            "{} {} {}",
            format!("[{}]", problem.kind).yellow(),
            location.cyan(),
            problem.error
        );
    }
}
