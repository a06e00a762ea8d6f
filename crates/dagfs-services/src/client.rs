//! Client side of the block protocol.
//!
//! The client owns the window allocator for the communication buffer. A
//! request's window stays reserved until its acknowledgment has been drained
//! and, for GET, its payload copied out. Only then are the window and the
//! request slot handed back.
//!
//! Completions picked up while an async helper waits for its own request
//! are held in arrival order and handed out by the next `drain_acks` or
//! `complete` call for them.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use dagfs_core::wire::{Opcode, Packet, PacketError, MAX_BLOCK_SIZE};
use dagfs_core::Cid;

use crate::buffer::WindowAllocator;
use crate::channel::{RequestId, RequestState, Source, TransportError};

/// Window used by `fetch` before the block length is known.
pub const DEFAULT_FETCH_WINDOW: u64 = 64 * 1024;

/// A drained acknowledgment.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub packet: Packet,
    /// Block bytes for a successful GET.
    pub payload: Option<Bytes>,
}

impl Completion {
    pub fn error(&self) -> PacketError {
        self.packet.error()
    }

    pub fn length(&self) -> u64 {
        self.packet.length()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }
}

pub struct Client {
    source: Source,
    alloc: WindowAllocator,
    inflight: HashMap<RequestId, Packet>,
    done: VecDeque<Completion>,
}

impl Client {
    pub fn new(source: Source) -> Self {
        let alloc = WindowAllocator::new(source.buffer().capacity());
        Self {
            source,
            alloc,
            inflight: HashMap::new(),
            done: VecDeque::new(),
        }
    }

    pub fn label(&self) -> &str {
        self.source.label()
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.source.buffer().capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    /// Requests submitted and not yet drained.
    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        if self.done.iter().any(|c| c.id == id) {
            return Some(RequestState::Completed);
        }
        self.source.state(id)
    }

    // ── Windows ───────────────────────────────────────────────────────────────

    /// Reserve a buffer window of `size` bytes.
    pub fn alloc_packet(&mut self, size: u64) -> Result<Packet, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let offset = self
            .alloc
            .alloc(size)
            .ok_or(TransportError::BufferExhausted(size))?;
        Ok(Packet::new(offset, size))
    }

    pub fn release_packet(&mut self, packet: &Packet) {
        if packet.size() > 0 {
            self.alloc.release(packet.offset());
        }
    }

    // ── Submission ────────────────────────────────────────────────────────────

    /// Submit a prepared request whose window came from `alloc_packet`.
    ///
    /// On error the window is still the caller's.
    pub fn submit(&mut self, packet: &Packet) -> Result<RequestId, TransportError> {
        let id = self.source.submit(packet)?;
        tracing::trace!(request = %id, op = %packet.operation(), cid = %packet.cid(), "submitted");
        self.inflight.insert(id, packet.clone());
        Ok(id)
    }

    /// Copy `data` into a fresh window and submit a PUT for it.
    pub fn submit_put(&mut self, cid: Cid, data: &[u8]) -> Result<RequestId, TransportError> {
        let window = self.alloc_packet(data.len() as u64)?;
        let result = self
            .source
            .buffer()
            .write(window.offset(), data)
            .map_err(TransportError::from)
            .and_then(|()| self.submit(&Packet::request(&window, cid, Opcode::Put)));
        if result.is_err() {
            self.release_packet(&window);
        }
        result
    }

    /// Submit a GET that offers a window of `window` bytes.
    pub fn submit_get(&mut self, cid: Cid, window: u64) -> Result<RequestId, TransportError> {
        let packet = self.alloc_packet(window)?;
        let result = self.submit(&Packet::request(&packet, cid, Opcode::Get));
        if result.is_err() {
            self.release_packet(&packet);
        }
        result
    }

    // ── Completion ────────────────────────────────────────────────────────────

    /// Drain whatever completions are available right now, starting with
    /// those already picked up by the async helpers.
    pub fn drain_acks(&mut self) -> DrainAcks<'_> {
        DrainAcks { client: self }
    }

    fn next_ack(&mut self) -> Option<Completion> {
        loop {
            let (id, decoded) = self.source.get_acked()?;
            let Some(request) = self.inflight.remove(&id) else {
                tracing::warn!(request = %id, "acknowledgment for unknown request");
                self.source.release(id);
                continue;
            };

            let mut packet = match decoded {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!(request = %id, error = %e, "undecodable acknowledgment");
                    let mut packet = request.clone();
                    packet.set_error(PacketError::Error);
                    packet.set_length(0);
                    packet
                }
            };

            let mut payload = None;
            if request.operation() == Opcode::Get && packet.error().is_ok() {
                if packet.length() > request.size() {
                    tracing::warn!(request = %id, length = packet.length(), "response longer than window");
                    packet.set_error(PacketError::Error);
                } else {
                    match self.source.buffer().read(request.offset(), packet.length()) {
                        Ok(bytes) => payload = Some(bytes),
                        Err(e) => {
                            tracing::warn!(request = %id, error = %e, "response window unreadable");
                            packet.set_error(PacketError::Error);
                        }
                    }
                }
            }

            self.release_packet(&request);
            self.source.release(id);
            tracing::trace!(request = %id, error = %packet.error(), length = packet.length(), "completed");
            return Some(Completion {
                id,
                packet,
                payload,
            });
        }
    }

    /// Wait for the completion of `id`. Other completions drained meanwhile
    /// are held for `drain_acks` or their own `complete` call.
    ///
    /// An id that is not outstanding (never submitted, or already handed
    /// out) fails with `UnknownRequest`.
    pub async fn complete(&mut self, id: RequestId) -> Result<Completion, TransportError> {
        loop {
            let held = self.done.iter().position(|c| c.id == id);
            if let Some(done) = held.and_then(|pos| self.done.remove(pos)) {
                return Ok(done);
            }
            while let Some(done) = self.next_ack() {
                if done.id == id {
                    return Ok(done);
                }
                self.done.push_back(done);
            }
            if self.is_closed() {
                self.inflight.clear();
                return Err(TransportError::Closed);
            }
            if !self.inflight.contains_key(&id) {
                return Err(TransportError::UnknownRequest(id));
            }
            self.source.ack_avail().await;
        }
    }

    /// Wait for some acknowledgment so a slot or window frees up.
    async fn make_room(&mut self, err: TransportError) -> Result<(), TransportError> {
        if self.inflight.is_empty() {
            return Err(err);
        }
        let before = self.done.len();
        while let Some(done) = self.next_ack() {
            self.done.push_back(done);
        }
        if self.done.len() == before {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            self.source.ack_avail().await;
        }
        Ok(())
    }

    /// Store a block and wait for the server's verdict.
    pub async fn put(&mut self, cid: Cid, data: &[u8]) -> Result<PacketError, TransportError> {
        let id = loop {
            match self.submit_put(cid.clone(), data) {
                Ok(id) => break id,
                Err(e @ (TransportError::QueueFull | TransportError::BufferExhausted(_))) => {
                    self.make_room(e).await?
                }
                Err(e) => return Err(e),
            }
        };
        Ok(self.complete(id).await?.error())
    }

    /// Fetch a block into a window of `window` bytes.
    pub async fn get(&mut self, cid: Cid, window: u64) -> Result<Completion, TransportError> {
        let id = loop {
            match self.submit_get(cid.clone(), window) {
                Ok(id) => break id,
                Err(e @ (TransportError::QueueFull | TransportError::BufferExhausted(_))) => {
                    self.make_room(e).await?
                }
                Err(e) => return Err(e),
            }
        };
        self.complete(id).await
    }

    /// GET with a default window, retried once at the reported length when
    /// the block did not fit.
    pub async fn fetch(&mut self, cid: Cid) -> Result<Completion, TransportError> {
        let window = DEFAULT_FETCH_WINDOW.min(self.buffer_capacity());
        let first = self.get(cid.clone(), window).await?;
        if first.error() != PacketError::Oversize {
            return Ok(first);
        }
        let length = first.length();
        if length > MAX_BLOCK_SIZE as u64 || length > self.buffer_capacity() {
            tracing::warn!(%cid, length, "block too large to fetch");
            return Ok(first);
        }
        tracing::debug!(%cid, length, "refetching with larger window");
        self.get(cid, length).await
    }

    /// Tear the session down.
    pub fn close(&mut self) {
        self.inflight.clear();
        self.done.clear();
        self.source.close();
    }
}

/// Lazy iterator returned by `Client::drain_acks`. Never blocks.
pub struct DrainAcks<'a> {
    client: &'a mut Client,
}

impl Iterator for DrainAcks<'_> {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        self.client
            .done
            .pop_front()
            .or_else(|| self.client.next_ack())
    }
}
