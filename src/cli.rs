use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;

use projectmap::core::Engine;

#[derive(Parser)]
#[command(name = "projectmap")]
#[command(about = "Structure and data-flow maps for web services")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default projectmap.toml
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Build a snapshot and export one graph
    Export {
        /// Source directory to analyze
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Graph to export (structure, dataflow)
        #[arg(long, default_value = "structure")]
        graph: String,

        /// Output format (json, payload, html)
        #[arg(long, default_value = "json")]
        format: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve one map endpoint path the way a host would
    Get {
        /// Request path, e.g. /_project_map/dataflow/json
        path: String,

        /// Source directory to analyze
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Override the configured base path
        #[arg(long)]
        base_path: Option<String>,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path } => {
                engine.init(path).await
            }
            Commands::Export { source, graph, format, output } => {
                engine.export(source, &graph, &format, output).await
            }
            Commands::Get { path, source, base_path } => {
                engine.get(&path, source, base_path).await
            }
        }
    }
}
