//! Session channel — two descriptor rings plus the communication buffer.
//!
//! The client end (`Source`) submits requests and collects acknowledgments;
//! the server end (`Sink`) takes requests and acknowledges them. Both ends
//! hold the same channel. Dropping either end tears the session down: queued
//! descriptors are discarded and both sides are woken so nobody waits for a
//! response that will never come.
//!
//! Outstanding requests occupy one of QUEUE_SIZE request slots. A slot is
//! taken when a request is submitted and given back when its acknowledgment
//! is drained, so at most QUEUE_SIZE requests are ever in flight and the
//! acknowledgment ring can never overflow. Responses are matched to requests
//! by slot, never by packet contents.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use dagfs_core::wire::{Packet, WireError, PACKET_RECORD_SIZE, QUEUE_SIZE};

use crate::buffer::CommBuffer;
use crate::queue::{Ring, RingFull};

// ── Request identity ──────────────────────────────────────────────────────────

/// Identifies one request for its whole life. The generation keeps a reused
/// slot from being confused with the request that held it before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    slot: u8,
    generation: u32,
}

impl RequestId {
    pub fn slot(&self) -> usize {
        usize::from(self.slot)
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Where an outstanding request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Sitting in the submission ring.
    Submitted,
    /// Taken by the server, response not yet drained.
    AwaitingResponse,
    /// Acknowledgment drained by the client.
    Completed,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    generation: u32,
    state: Option<RequestState>,
}

struct SlotTable {
    slots: [Slot; QUEUE_SIZE],
}

impl SlotTable {
    fn new() -> Self {
        Self {
            slots: [Slot::default(); QUEUE_SIZE],
        }
    }

    fn acquire(&mut self) -> Option<RequestId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state.is_none())?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.state = Some(RequestState::Submitted);
        Some(RequestId {
            // QUEUE_SIZE fits in a u8
            slot: index as u8,
            generation: slot.generation,
        })
    }

    fn get_mut(&mut self, id: RequestId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.slot())
            .filter(|s| s.generation == id.generation && s.state.is_some())
    }

    fn state(&self, id: RequestId) -> Option<RequestState> {
        self.slots
            .get(id.slot())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.state)
    }

    fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.state.is_some()).count()
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.state = None;
        }
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// One ring entry: the request slot plus the encoded packet record.
struct Entry {
    id: RequestId,
    record: [u8; PACKET_RECORD_SIZE],
}

struct Channel {
    label: String,
    submit: Ring<Entry>,
    ack: Ring<Entry>,
    buffer: CommBuffer,
    slots: Mutex<SlotTable>,
    closed: AtomicBool,
}

impl Channel {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.submit.clear() + self.ack.clear();
        self.slots.lock().clear();
        self.submit.wake_all();
        self.ack.wake_all();
        tracing::info!(label = %self.label, dropped, "session channel closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transport-level failures. Storage outcomes never show up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request queue full ({} outstanding)", QUEUE_SIZE)]
    QueueFull,

    #[error("session closed")]
    Closed,

    #[error("no free buffer window of {0} bytes")]
    BufferExhausted(u64),

    #[error("request {0} is not outstanding")]
    UnknownRequest(RequestId),

    #[error(transparent)]
    Window(#[from] crate::buffer::WindowError),
}

/// Create a connected channel with a buffer of `buf_size` bytes.
pub fn open(label: impl Into<String>, buf_size: usize) -> (Source, Sink) {
    let channel = Arc::new(Channel {
        label: label.into(),
        submit: Ring::with_capacity(QUEUE_SIZE),
        ack: Ring::with_capacity(QUEUE_SIZE),
        buffer: CommBuffer::new(buf_size),
        slots: Mutex::new(SlotTable::new()),
        closed: AtomicBool::new(false),
    });
    (
        Source {
            channel: channel.clone(),
        },
        Sink { channel },
    )
}

// ── Client end ────────────────────────────────────────────────────────────────

/// Client end of a channel.
pub struct Source {
    channel: Arc<Channel>,
}

impl Source {
    pub fn label(&self) -> &str {
        &self.channel.label
    }

    pub fn buffer(&self) -> &CommBuffer {
        &self.channel.buffer
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Number of request slots currently taken.
    pub fn outstanding(&self) -> usize {
        self.channel.slots.lock().in_use()
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.channel.slots.lock().state(id)
    }

    /// Put a request on the submission ring.
    pub fn submit(&self, packet: &Packet) -> Result<RequestId, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self
            .channel
            .slots
            .lock()
            .acquire()
            .ok_or(TransportError::QueueFull)?;
        let entry = Entry {
            id,
            record: packet.encode(),
        };
        if let Err(RingFull(entry)) = self.channel.submit.push(entry) {
            self.release(entry.id);
            return Err(TransportError::QueueFull);
        }
        Ok(id)
    }

    /// Take the next acknowledgment off the ring, if any.
    ///
    /// The record is decoded but its slot stays taken until `release`, so the
    /// caller can read the response window first.
    pub fn get_acked(&self) -> Option<(RequestId, Result<Packet, WireError>)> {
        let entry = self.channel.ack.pop()?;
        if let Some(slot) = self.channel.slots.lock().get_mut(entry.id) {
            slot.state = Some(RequestState::Completed);
        }
        Some((entry.id, Packet::decode(&entry.record)))
    }

    /// Give a request slot back.
    pub fn release(&self, id: RequestId) {
        if let Some(slot) = self.channel.slots.lock().get_mut(id) {
            slot.state = None;
        }
    }

    pub fn has_acks(&self) -> bool {
        !self.channel.ack.is_empty()
    }

    /// Wait until an acknowledgment may be available or the session closed.
    pub async fn ack_avail(&self) {
        if self.has_acks() || self.is_closed() {
            return;
        }
        self.channel.ack.wait_avail().await
    }

    /// Wait until the submission ring may have room or the session closed.
    pub async fn ready_to_submit(&self) {
        if !self.channel.submit.is_full() || self.is_closed() {
            return;
        }
        self.channel.submit.wait_space().await
    }

    /// Tear the session down.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.channel.close();
    }
}

// ── Server end ────────────────────────────────────────────────────────────────

/// Server end of a channel.
pub struct Sink {
    channel: Arc<Channel>,
}

impl Sink {
    pub fn label(&self) -> &str {
        &self.channel.label
    }

    pub fn buffer(&self) -> &CommBuffer {
        &self.channel.buffer
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub fn packet_avail(&self) -> bool {
        !self.channel.submit.is_empty()
    }

    pub fn ready_to_ack(&self) -> bool {
        !self.channel.ack.is_full()
    }

    /// Take the next request off the submission ring.
    pub fn get_packet(&self) -> Option<(RequestId, Result<Packet, WireError>)> {
        let entry = self.channel.submit.pop()?;
        if let Some(slot) = self.channel.slots.lock().get_mut(entry.id) {
            slot.state = Some(RequestState::AwaitingResponse);
        }
        Some((entry.id, Packet::decode(&entry.record)))
    }

    /// Put the response for request `id` on the acknowledgment ring.
    pub fn acknowledge(&self, id: RequestId, packet: &Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.channel
            .ack
            .push(Entry {
                id,
                record: packet.encode(),
            })
            .map_err(|_| TransportError::QueueFull)
    }

    /// Wait until a request may be available or the session closed.
    pub async fn wait_packet_avail(&self) {
        if self.packet_avail() || self.is_closed() {
            return;
        }
        self.channel.submit.wait_avail().await
    }

    /// Wait until the acknowledgment ring may have room or the session closed.
    pub async fn wait_ready_to_ack(&self) {
        if self.ready_to_ack() || self.is_closed() {
            return;
        }
        self.channel.ack.wait_space().await
    }

    pub fn close(&self) {
        self.channel.close();
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.channel.close();
    }
}
