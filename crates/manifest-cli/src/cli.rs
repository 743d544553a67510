//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manifest - resolve layered manifests into one document
#[derive(Parser, Debug)]
#[command(name = "manifest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory manifest URIs are resolved against
    #[arg(short, long, global = true, default_value = ".", env = "MANIFEST_DIR")]
    pub dir: PathBuf,

    /// Engine configuration file (defaults to manifest.toml in --dir)
    #[arg(short, long, global = true, env = "MANIFEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Additional root manifest, loaded after the configured roots
    #[arg(short, long = "root", global = true)]
    pub roots: Vec<String>,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Print the merged document
    ///
    /// Examples:
    ///   manifest resolve                      # Whole document as YAML
    ///   manifest resolve /entities/components # One subtree
    ///   manifest resolve --json               # JSON for scripting
    Resolve {
        /// Path into the document, e.g. /entities/components
        path: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show which manifest contributed each document path
    Map {
        /// Only show paths under this prefix
        prefix: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Load everything and report problems; exits non-zero if any
    Check {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// List loaded layers, importers before their imports
    Layers {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
}
