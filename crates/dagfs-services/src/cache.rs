//! On-disk block store.
//!
//! Blocks are stored by key in a two-level directory structure:
//!   {root}/{key[0..2]}/{key}
//! where key is the BLAKE3 hex of the CID string. CIDs are free-form text,
//! so they are hashed rather than used as file names directly.
//!
//! Files are immutable. If the key exists, the content is whatever was
//! first stored under it. Concurrent writers of one key each write their
//! own temp file; the first to link it into place wins and the others
//! discard theirs.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use memmap2::Mmap;

use dagfs_core::{crypto, Cid};

use crate::store::{reserve, BlockStore, StoreError};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed block store on the local file system.
pub struct DiskStore {
    root: PathBuf,
    capacity: u64,
    used: AtomicU64,
}

impl DiskStore {
    /// Open (or create) a store rooted at the given directory.
    ///
    /// `capacity` caps stored bytes; 0 means unlimited. Existing blocks count
    /// against it.
    pub fn open(root: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store root: {}", root.display()))?;
        let store = Self {
            root,
            capacity,
            used: AtomicU64::new(0),
        };
        store.used.store(store.scan_size(), Ordering::SeqCst);
        tracing::debug!(
            root = %store.root.display(),
            blocks = store.count(),
            bytes = store.size(),
            "disk store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the filesystem path for a block.
    fn block_path(&self, cid: &Cid) -> PathBuf {
        let key = crypto::hash_hex(cid.as_bytes());
        // Two-level: blocks/ab/abc123...
        self.root.join(&key[0..2]).join(&key)
    }

    fn read_block(&self, path: &Path) -> Result<Bytes> {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open block: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat block: {}", path.display()))?
            .len();
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap block: {}", path.display()))?
        };
        Ok(Bytes::copy_from_slice(&mmap))
    }

    /// Atomic write: private tmp file → hard link into place.
    ///
    /// Returns false if another writer got the key first; the existing file
    /// is left untouched.
    fn write_block(&self, path: &Path, data: &[u8]) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store dir: {}", parent.display()))?;
        }

        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}-{n}.tmp", std::process::id()));
        let linked = Self::write_tmp(&tmp_path, data).and_then(|()| {
            match fs::hard_link(&tmp_path, path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e).with_context(|| {
                    format!("failed to link {} to {}", tmp_path.display(), path.display())
                }),
            }
        });
        let _ = fs::remove_file(&tmp_path);
        linked
    }

    fn write_tmp(tmp_path: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(data).context("failed to write block data")?;
        file.sync_all().context("failed to sync block to disk")
    }

    fn blocks(&self) -> impl Iterator<Item = fs::DirEntry> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| fs::read_dir(entry.path()).ok())
            .flat_map(|subdir| subdir.flatten())
            .filter(|entry| entry.path().extension().is_none())
    }

    fn scan_size(&self) -> u64 {
        self.blocks()
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Remove every stored block.
    pub fn clear(&self) {
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let _ = fs::remove_dir_all(entry.path());
            }
        }
        self.used.store(0, Ordering::SeqCst);
    }
}

impl BlockStore for DiskStore {
    fn put(&self, cid: &Cid, data: &[u8]) -> Result<(), StoreError> {
        let path = self.block_path(cid);

        // Already exists? Nothing to do.
        if path.exists() {
            return Ok(());
        }

        reserve(&self.used, self.capacity, data.len() as u64)?;
        match self.write_block(&path, data) {
            Ok(true) => {
                tracing::trace!(%cid, len = data.len(), "block stored");
                Ok(())
            }
            Ok(false) => {
                self.used.fetch_sub(data.len() as u64, Ordering::SeqCst);
                tracing::trace!(%cid, "block stored concurrently by another writer");
                Ok(())
            }
            Err(e) => {
                self.used.fetch_sub(data.len() as u64, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn get(&self, cid: &Cid) -> Result<Option<Bytes>, StoreError> {
        let path = self.block_path(cid);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_block(&path)?))
    }

    fn has(&self, cid: &Cid) -> bool {
        self.block_path(cid).exists()
    }

    fn count(&self) -> usize {
        self.blocks().count()
    }

    fn size(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}
