//! Block stores: where the server keeps blocks, keyed by CID.
//!
//! Stores are immutable by key: a second put of a known CID succeeds without
//! touching the stored bytes. Running out of capacity is reported as
//! `StoreError::Full` so the server can answer FULL instead of ERROR.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use dagfs_core::Cid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store full: {needed} bytes needed, {available} available")]
    Full { needed: u64, available: u64 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Storage behind a DAGFS server.
pub trait BlockStore: Send + Sync {
    /// Store a block. Storing a CID that is already present is a no-op.
    fn put(&self, cid: &Cid, data: &[u8]) -> Result<(), StoreError>;

    /// Retrieve a block, or None if the CID is unknown.
    fn get(&self, cid: &Cid) -> Result<Option<Bytes>, StoreError>;

    fn has(&self, cid: &Cid) -> bool;

    /// Number of stored blocks.
    fn count(&self) -> usize;

    /// Total stored bytes.
    fn size(&self) -> u64;
}

/// Reserve `needed` bytes against `used` without exceeding `capacity`.
/// A capacity of 0 means unlimited.
pub(crate) fn reserve(used: &AtomicU64, capacity: u64, needed: u64) -> Result<(), StoreError> {
    used.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
        let next = current.checked_add(needed)?;
        (capacity == 0 || next <= capacity).then_some(next)
    })
    .map(|_| ())
    .map_err(|current| StoreError::Full {
        needed,
        available: capacity.saturating_sub(current),
    })
}

/// Volatile store, mostly for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    blocks: DashMap<Cid, Bytes>,
    used: AtomicU64,
    capacity: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses blocks once `capacity` bytes are held.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, cid: &Cid, data: &[u8]) -> Result<(), StoreError> {
        match self.blocks.entry(cid.clone()) {
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                reserve(&self.used, self.capacity, data.len() as u64)?;
                slot.insert(Bytes::copy_from_slice(data));
                tracing::trace!(%cid, len = data.len(), "block stored");
                Ok(())
            }
        }
    }

    fn get(&self, cid: &Cid) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blocks.get(cid).map(|b| b.value().clone()))
    }

    fn has(&self, cid: &Cid) -> bool {
        self.blocks.contains_key(cid)
    }

    fn count(&self) -> usize {
        self.blocks.len()
    }

    fn size(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}
