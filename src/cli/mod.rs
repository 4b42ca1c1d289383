use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "catalogue-core", about = "Manual exerciser for the catalogue library")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Runs a scan over the configured sources (or a single `--source`).
    Scan {
        /// Restrict the scan to one source directory instead of every configured source.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Re-read every file regardless of mtime.
        #[arg(long)]
        full: bool,
    },

    /// Runs a query against the full-text and trigram search surfaces.
    Search {
        query: String,

        /// Restrict results to albums.
        #[arg(long)]
        albums_only: bool,
    },

    /// Verifies non-completed downloads against the configured completed root,
    /// promoting any whose files are already fully present on disk.
    Reconcile,
}
