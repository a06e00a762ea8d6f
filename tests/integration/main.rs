//! DAGFS integration test harness.
//!
//! Every test brings up its own session: a client on one side, a server
//! task on the other, both sharing one channel. Nothing here touches the
//! network; disk-backed tests use directories under the system temp dir.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use dagfs_core::Cid;
use dagfs_services::{establish, BlockStore, Client, MemoryStore, Server, SessionArgs, Sink};

mod backpressure;
mod files;
mod protocol;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const BUF_SIZE: u64 = 1 << 20;

/// A client connected to a running server task.
pub struct Harness {
    pub client: Client,
    pub store: Arc<dyn BlockStore>,
    shutdown: broadcast::Sender<()>,
    server: JoinHandle<Result<()>>,
}

impl Harness {
    pub fn start(store: Arc<dyn BlockStore>) -> Self {
        Self::start_with(store, false)
    }

    pub fn start_with(store: Arc<dyn BlockStore>, verify_cids: bool) -> Self {
        let (client, sink) = session("harness");
        let (shutdown, rx) = broadcast::channel(1);
        let server = tokio::spawn(
            Server::new(sink, store.clone())
                .verify_cids(verify_cids)
                .run(rx),
        );
        Self {
            client,
            store,
            shutdown,
            server,
        }
    }

    pub fn memory() -> Self {
        Self::start(Arc::new(MemoryStore::new()))
    }

    /// Stop the server and wait for it to exit.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .context("server did not stop")??
    }
}

/// A fresh session with a 1 MiB buffer and no server attached.
pub fn session(label: &str) -> (Client, Sink) {
    establish(&SessionArgs::new(label, BUF_SIZE)).expect("session should be established")
}

pub fn cid(text: &str) -> Cid {
    Cid::new(text).expect("valid cid")
}

/// The 64-digit hex CID used by the reference scenario.
pub fn deadbeef() -> Cid {
    cid(&"deadbeef".repeat(8))
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(tag: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "dagfs-it-{tag}-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Session arguments survive the textual form and come up as a session.
#[test]
fn test_session_from_arg_string() {
    let text = SessionArgs::new("from-text", 64 * 1024).to_arg_string();
    assert!(text.contains("tx_buf_size=65536"));
    assert!(text.contains("label=\"from-text\""));

    let args = SessionArgs::parse(&text).unwrap();
    let (client, _sink) = establish(&args).unwrap();
    assert_eq!(client.label(), "from-text");
    assert_eq!(client.buffer_capacity(), 64 * 1024);
}

#[tokio::test]
async fn test_harness_starts_and_stops() {
    let harness = Harness::memory();
    assert!(!harness.client.is_closed());
    harness.stop().await.unwrap();
}
