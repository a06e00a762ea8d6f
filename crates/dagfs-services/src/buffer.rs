//! The communication buffer and its window allocator.
//!
//! Block bytes never travel through the rings. A PUT leaves its payload in a
//! window of this buffer and a GET response is written into the window the
//! client offered. Windows are owned by whichever side is producing into
//! them; the lock below only keeps memory access sound and does not arbitrate
//! ownership. Every offset/size pair coming off a ring is checked against
//! the capacity before any byte is touched.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use bytes::Bytes;
use parking_lot::RwLock;

/// A window that does not fit the buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("window {offset}+{size} outside buffer of {capacity} bytes")]
pub struct WindowError {
    pub offset: u64,
    pub size: u64,
    pub capacity: u64,
}

/// Shared byte region backing one session.
pub struct CommBuffer {
    data: RwLock<Box<[u8]>>,
    capacity: u64,
}

impl CommBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; capacity].into_boxed_slice()),
            capacity: capacity as u64,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Resolve a window to a byte range, or fail if any part of it lies
    /// outside the buffer.
    pub fn check(&self, offset: u64, size: u64) -> Result<Range<usize>, WindowError> {
        let err = WindowError {
            offset,
            size,
            capacity: self.capacity,
        };
        let end = offset.checked_add(size).ok_or_else(|| err.clone())?;
        if end > self.capacity {
            return Err(err);
        }
        // end <= capacity, which came from a usize
        Ok(offset as usize..end as usize)
    }

    /// Copy `data` into the buffer at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), WindowError> {
        let range = self.check(offset, data.len() as u64)?;
        self.data.write()[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the buffer starting at `offset`.
    pub fn read(&self, offset: u64, len: u64) -> Result<Bytes, WindowError> {
        let range = self.check(offset, len)?;
        Ok(Bytes::copy_from_slice(&self.data.read()[range]))
    }
}

/// First-fit allocator for buffer windows, used by the client side only.
///
/// Free space is kept as a map of offset → length and coalesced on release.
#[derive(Debug)]
pub struct WindowAllocator {
    capacity: u64,
    free: BTreeMap<u64, u64>,
    reserved: HashMap<u64, u64>,
}

impl WindowAllocator {
    pub fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            free,
            reserved: HashMap::new(),
        }
    }

    /// Reserve `size` bytes. Returns the window offset.
    ///
    /// Zero-sized windows are never reserved and always succeed at offset 0.
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return Some(0);
        }
        let (&offset, &len) = self.free.iter().find(|(_, len)| **len >= size)?;
        self.free.remove(&offset);
        if len > size {
            self.free.insert(offset + size, len - size);
        }
        self.reserved.insert(offset, size);
        Some(offset)
    }

    /// Return a window obtained from `alloc`. Unknown offsets are ignored
    /// and reported as false.
    pub fn release(&mut self, offset: u64) -> bool {
        let Some(size) = self.reserved.remove(&offset) else {
            return false;
        };
        let mut start = offset;
        let mut len = size;

        if let Some(next_len) = self.free.remove(&(offset + size)) {
            len += next_len;
        }
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
        true
    }

    /// Total free bytes, not necessarily contiguous.
    pub fn available(&self) -> u64 {
        self.free.values().sum()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_reserved(&self, offset: u64) -> bool {
        self.reserved.contains_key(&offset)
    }
}
