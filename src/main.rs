use anyhow::{Context, Result};
use clap::Parser;

use mboxsync::cli::Cli;
use mboxsync::config::SyncConfig;
use mboxsync::index::SqliteIndex;
use mboxsync::locking::UnixFileLock;
use mboxsync::sync::{Driver, SyncFlags};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::load()?;

    let index_path = index_path_for(&cli.mbox_path);
    let index = SqliteIndex::open(&index_path)
        .with_context(|| format!("opening index at {}", index_path.display()))?;
    let lock = UnixFileLock;

    let mut driver = Driver::new(cli.mbox_path.clone(), index, lock, config);
    let flags = SyncFlags {
        force_full: cli.force_full,
        undirty: cli.undirty,
        rewrite: cli.rewrite,
        lock_reading: cli.lock_reading,
        last_commit: cli.last_commit,
        header_only: cli.header_only,
    };

    driver
        .run(flags)
        .with_context(|| format!("syncing {}", driver.mbox_path().display()))
}

/// Derive the sidecar index path from the mbox path (spec.md §6 "Index
/// operations" leaves the index's own storage location out of scope).
fn index_path_for(mbox_path: &std::path::Path) -> std::path::PathBuf {
    let mut name = mbox_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".mboxsyncindex");
    mbox_path.with_file_name(name)
}

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
