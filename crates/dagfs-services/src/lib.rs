//! dagfs-services — block stores, session channel, client, server and the
//! file-system adapter.

pub mod buffer;
pub mod cache;
pub mod channel;
pub mod client;
pub mod fs;
pub mod queue;
pub mod server;
pub mod session;
pub mod store;

pub use buffer::{CommBuffer, WindowAllocator, WindowError};
pub use cache::DiskStore;
pub use channel::{RequestId, RequestState, Sink, Source, TransportError};
pub use client::{Client, Completion, DrainAcks};
pub use fs::{FsBackend, FsError, FsSession, Manifest, ManifestEntry, ManifestFs, Mode, NodeKind, Status};
pub use server::Server;
pub use session::{establish, SessionArgs, SessionError};
pub use store::{BlockStore, MemoryStore, StoreError};
