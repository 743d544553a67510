//! Manifest CLI
//!
//! Loads a layered manifest from a directory and prints the merged result.

mod cli;
mod commands;
mod context;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}: failed to initialize logging: {e}", "warning".yellow());
    }
    tracing::debug!(dir = %cli.dir.display(), "Verbose mode enabled");

    let Some(command) = cli.command.clone() else {
        println!("{} Manifest resolution engine", "manifest".green().bold());
        println!();
        println!("Run {} for available commands.", "manifest --help".cyan());
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute_command(&cli, command))
}

async fn execute_command(cli: &Cli, command: Commands) -> Result<()> {
    let config = context::load_config(&cli.dir, cli.config.as_deref(), &cli.roots)?;
    let engine = context::open(&cli.dir, config).await?;
    let snapshot = engine.published();

    match command {
        Commands::Resolve { path, json } => commands::run_resolve(&snapshot, path.as_deref(), json),
        Commands::Map { prefix, json } => commands::run_map(&snapshot, prefix.as_deref(), json),
        Commands::Check { json } => commands::run_check(&snapshot, json),
        Commands::Layers { json } => commands::run_layers(&engine, json).await,
    }
}
