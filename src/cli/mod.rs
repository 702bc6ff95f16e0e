//! CLI module for the IL2CPP dump ingester.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Bulk ingestion of IL2CPP dumps into a vector store.
#[derive(Debug, Parser)]
#[command(name = "il2cpp-ingest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Chunk, embed and store a dump (Ctrl-C pauses and saves state)
    Ingest(commands::IngestArgs),

    /// Check infrastructure status (embedding server, Qdrant, recent runs)
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
