//! dagfsd — runs a DAGFS block server and drives it with one command.

use std::sync::Arc;

use anyhow::{Context, Result};

use dagfs_core::config::{DagfsConfig, StorageBackend};
use dagfs_services::session::{align_to_page, required_ram_quota};
use dagfs_services::{establish, BlockStore, DiskStore, MemoryStore, SessionArgs, Server};

mod ops;

fn print_usage() {
    println!("Usage: dagfsd <command>");
    println!();
    println!("Commands:");
    println!("  put <path>...            Store files as blocks, print a JSON manifest");
    println!("  get <cid> <out>          Fetch a block into a file");
    println!("  cat <manifest> <path>    Print a file listed in a manifest");
    println!("  stat                     Show block count and stored bytes");
    println!();
    println!("Configuration: {}", DagfsConfig::file_path().display());
}

fn open_store(config: &DagfsConfig) -> Result<Arc<dyn BlockStore>> {
    let capacity = config.storage.capacity_bytes;
    Ok(match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!(capacity, "using memory block store");
            Arc::new(MemoryStore::with_capacity(capacity))
        }
        StorageBackend::Disk => {
            let store = DiskStore::open(&config.storage.path, capacity).with_context(|| {
                format!("failed to open block store at {}", config.storage.path.display())
            })?;
            tracing::info!(root = %store.root().display(), capacity, "using disk block store");
            Arc::new(store)
        }
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command: Vec<&str> = args.iter().map(String::as_str).collect();
    if matches!(command.as_slice(), [] | ["help"] | ["--help"] | ["-h"]) {
        print_usage();
        return Ok(());
    }

    if let Err(e) = DagfsConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = DagfsConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        DagfsConfig::default()
    });

    let store = open_store(&config)?;

    let mut session = SessionArgs::new(config.session.label.clone(), config.session.tx_buf_size);
    if config.session.ram_quota != 0 {
        session = session.with_ram_quota(config.session.ram_quota);
    } else if let Some(aligned) = align_to_page(config.session.tx_buf_size) {
        // the minimum for the page-aligned buffer
        session = session.with_ram_quota(required_ram_quota(aligned));
    }
    tracing::debug!(args = %session.to_arg_string(), "requesting session");
    let (mut client, sink) = establish(&session).context("failed to establish session")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let server = Server::new(sink, store.clone()).verify_cids(config.server.verify_cids);
    let server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));

    let result = match command.as_slice() {
        ["put", paths @ ..] if !paths.is_empty() => ops::cmd_put(&mut client, paths).await,
        ["get", cid, out] => ops::cmd_get(&mut client, cid, out).await,
        ["cat", manifest, path] => ops::cmd_cat(&mut client, manifest, path).await,
        ["stat"] => ops::cmd_stat(store.as_ref()),
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    let _ = shutdown_tx.send(());
    client.close();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "server exited with error"),
        Err(e) => tracing::error!(error = %e, "server task failed"),
    }

    result
}
