//! Path-addressed file access on top of the block protocol.
//!
//! `FsSession` answers the full set of file-system procedures. The ones that
//! make sense for content-addressed data are delegated to an `FsBackend`;
//! the rest are answered directly (symlinks never resolve, control is a
//! no-op, mutation by path is refused).
//!
//! `ManifestFs` is a read-only backend built from a manifest that maps paths
//! to CIDs. Directories are implied by the paths of the files below them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use dagfs_core::wire::PacketError;
use dagfs_core::{crypto, Cid};

use crate::channel::TransportError;
use crate::client::Client;

pub type Handle = u64;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("block {cid}: {error}")]
    Block { cid: Cid, error: PacketError },

    #[error("bad manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub kind: NodeKind,
    pub size: u64,
    pub inode: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// The procedures a file-system backend provides.
pub trait FsBackend {
    fn node(&mut self, path: &str) -> Result<Handle, FsError>;
    fn dir(&mut self, path: &str, create: bool) -> Result<Handle, FsError>;
    fn file(&mut self, dir: Handle, name: &str, mode: Mode, create: bool) -> Result<Handle, FsError>;
    fn status(&self, handle: Handle) -> Result<Status, FsError>;
    fn close(&mut self, handle: Handle);
}

/// A file-system session over an injected backend.
pub struct FsSession<B> {
    backend: B,
}

impl<B: FsBackend> FsSession<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn node(&mut self, path: &str) -> Result<Handle, FsError> {
        self.backend.node(path)
    }

    pub fn dir(&mut self, path: &str, create: bool) -> Result<Handle, FsError> {
        self.backend.dir(path, create)
    }

    pub fn file(&mut self, dir: Handle, name: &str, mode: Mode, create: bool) -> Result<Handle, FsError> {
        self.backend.file(dir, name, mode, create)
    }

    pub fn status(&self, handle: Handle) -> Result<Status, FsError> {
        self.backend.status(handle)
    }

    pub fn close(&mut self, handle: Handle) {
        self.backend.close(handle)
    }

    pub fn symlink(&mut self, _dir: Handle, name: &str, _create: bool) -> Result<Handle, FsError> {
        Err(FsError::LookupFailed(name.to_string()))
    }

    pub fn control(&mut self, _handle: Handle) {}

    pub fn unlink(&mut self, _dir: Handle, _name: &str) -> Result<(), FsError> {
        Err(FsError::PermissionDenied)
    }

    pub fn truncate(&mut self, _file: Handle, _size: u64) -> Result<(), FsError> {
        Err(FsError::PermissionDenied)
    }

    pub fn move_node(&mut self, _from: Handle, _from_name: &str, _to: Handle, _to_name: &str) -> Result<(), FsError> {
        Err(FsError::PermissionDenied)
    }
}

// ── Manifest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub cid: Cid,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self, FsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, FsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Canonical form: leading slash, no trailing slash, no empty or `.`
/// components. `..` is refused.
fn normalize(path: &str) -> Result<String, FsError> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(FsError::LookupFailed(path.to_string())),
            part => parts.push(part),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

fn inode(path: &str) -> u64 {
    let digest = crypto::hash(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[derive(Debug, Clone)]
struct Open {
    path: String,
    kind: NodeKind,
}

/// Read-only backend that resolves paths through a manifest.
pub struct ManifestFs {
    files: BTreeMap<String, ManifestEntry>,
    dirs: BTreeSet<String>,
    open: HashMap<Handle, Open>,
    next_handle: Handle,
}

impl ManifestFs {
    pub fn new(manifest: Manifest) -> Result<Self, FsError> {
        let mut files = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());

        for entry in manifest.entries {
            let path = normalize(&entry.path)?;
            if path == "/" {
                return Err(FsError::LookupFailed(entry.path));
            }
            let mut ancestor = path.as_str();
            while let Some((parent, _)) = ancestor.rsplit_once('/') {
                if parent.is_empty() {
                    break;
                }
                dirs.insert(parent.to_string());
                ancestor = parent;
            }
            files.insert(path, entry);
        }

        if let Some(clash) = files.keys().find(|p| dirs.contains(*p)) {
            return Err(FsError::NotADirectory(clash.clone()));
        }

        tracing::debug!(files = files.len(), dirs = dirs.len(), "manifest loaded");
        Ok(Self {
            files,
            dirs,
            open: HashMap::new(),
            next_handle: 1,
        })
    }

    fn kind_of(&self, path: &str) -> Option<NodeKind> {
        if self.dirs.contains(path) {
            Some(NodeKind::Directory)
        } else if self.files.contains_key(path) {
            Some(NodeKind::File)
        } else {
            None
        }
    }

    fn open_handle(&mut self, path: String, kind: NodeKind) -> Handle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.open.insert(handle, Open { path, kind });
        handle
    }

    fn entry(&self, handle: Handle) -> Result<(&Open, Option<&ManifestEntry>), FsError> {
        let open = self.open.get(&handle).ok_or(FsError::InvalidHandle(handle))?;
        let entry = match open.kind {
            NodeKind::File => Some(
                self.files
                    .get(&open.path)
                    .ok_or_else(|| FsError::LookupFailed(open.path.clone()))?,
            ),
            NodeKind::Directory => None,
        };
        Ok((open, entry))
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    /// Read the whole file behind `handle`.
    pub async fn read(&self, handle: Handle, client: &mut Client) -> Result<Bytes, FsError> {
        let (open, entry) = self.entry(handle)?;
        let entry = entry.ok_or(FsError::InvalidHandle(handle))?;

        let done = client.fetch(entry.cid.clone()).await?;
        if done.error() != PacketError::Ok {
            return Err(FsError::Block {
                cid: entry.cid.clone(),
                error: done.error(),
            });
        }
        let data = done.payload.unwrap_or_default();
        if data.len() as u64 != entry.size {
            tracing::warn!(
                path = %open.path,
                cid = %entry.cid,
                expected = entry.size,
                actual = data.len(),
                "block size differs from manifest"
            );
        }
        Ok(data)
    }
}

impl FsBackend for ManifestFs {
    fn node(&mut self, path: &str) -> Result<Handle, FsError> {
        let path = normalize(path)?;
        let kind = self
            .kind_of(&path)
            .ok_or_else(|| FsError::LookupFailed(path.clone()))?;
        Ok(self.open_handle(path, kind))
    }

    fn dir(&mut self, path: &str, create: bool) -> Result<Handle, FsError> {
        if create {
            return Err(FsError::PermissionDenied);
        }
        let path = normalize(path)?;
        match self.kind_of(&path) {
            Some(NodeKind::Directory) => Ok(self.open_handle(path, NodeKind::Directory)),
            Some(NodeKind::File) => Err(FsError::NotADirectory(path)),
            None => Err(FsError::LookupFailed(path)),
        }
    }

    fn file(&mut self, dir: Handle, name: &str, mode: Mode, create: bool) -> Result<Handle, FsError> {
        if create || mode != Mode::ReadOnly {
            return Err(FsError::PermissionDenied);
        }
        let parent = match self.open.get(&dir) {
            Some(Open {
                path,
                kind: NodeKind::Directory,
            }) => path.clone(),
            Some(open) => return Err(FsError::NotADirectory(open.path.clone())),
            None => return Err(FsError::InvalidHandle(dir)),
        };
        if name.is_empty() || name.contains('/') {
            return Err(FsError::LookupFailed(name.to_string()));
        }
        let path = normalize(&format!("{parent}/{name}"))?;
        if !self.files.contains_key(&path) {
            return Err(FsError::LookupFailed(path));
        }
        Ok(self.open_handle(path, NodeKind::File))
    }

    fn status(&self, handle: Handle) -> Result<Status, FsError> {
        let (open, entry) = self.entry(handle)?;
        let size = entry.map_or(0, |e| e.size);
        Ok(Status {
            kind: open.kind,
            size,
            inode: inode(&open.path),
        })
    }

    fn close(&mut self, handle: Handle) {
        if self.open.remove(&handle).is_none() {
            tracing::trace!(handle, "close of unknown handle");
        }
    }
}
