use std::path::PathBuf;

use clap::Parser;

/// Command-line options for the mbox sync engine (spec.md §6 "Sync flags").
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the mbox file to synchronize.
    pub mbox_path: PathBuf,

    /// Bypass the cheap (mtime, size) pre-check and force a full pass.
    #[arg(long)]
    pub force_full: bool,

    /// Accept a dirty index state without rewriting disk where avoidable.
    #[arg(long)]
    pub undirty: bool,

    /// Force header rewrites even where deferral would otherwise apply.
    #[arg(long)]
    pub rewrite: bool,

    /// Take a read lock even for what would otherwise be a write pass.
    #[arg(long)]
    pub lock_reading: bool,

    /// Treat the stored sync_stamp as the last commit point for change
    /// detection, rather than re-deriving it from the index header.
    #[arg(long)]
    pub last_commit: bool,

    /// Only (re)write the pseudo message / folder header, skipping the
    /// per-message sync loop.
    #[arg(long)]
    pub header_only: bool,
}
