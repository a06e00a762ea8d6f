//! Server side of the block protocol.
//!
//! Drains the submission ring, answers each request against a `BlockStore`
//! and puts the response on the acknowledgment ring. The response is the
//! request packet itself with `length` and `error` rewritten.
//!
//! Storage outcomes (MISSING, OVERSIZE, FULL, ERROR) are answers, not
//! failures: the only way this loop stops is shutdown or a closed session.

use std::sync::Arc;

use tokio::sync::broadcast;

use dagfs_core::wire::{Opcode, Packet, PacketError, MAX_BLOCK_SIZE};
use dagfs_core::Cid;

use crate::channel::Sink;
use crate::store::{BlockStore, StoreError};

pub struct Server {
    sink: Sink,
    store: Arc<dyn BlockStore>,
    verify_cids: bool,
}

impl Server {
    pub fn new(sink: Sink, store: Arc<dyn BlockStore>) -> Self {
        Self {
            sink,
            store,
            verify_cids: false,
        }
    }

    /// Refuse PUTs whose bytes do not hash to their digest CID.
    pub fn verify_cids(mut self, verify: bool) -> Self {
        self.verify_cids = verify;
        self
    }

    /// Answer every request currently queued. Returns how many were answered.
    ///
    /// Stops early when the acknowledgment ring has no room, leaving the
    /// remaining requests queued.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        while self.sink.ready_to_ack() {
            let Some((id, decoded)) = self.sink.get_packet() else {
                break;
            };
            let response = match decoded {
                Ok(packet) => self.handle(packet),
                Err(e) => {
                    tracing::warn!(request = %id, error = %e, "undecodable request");
                    Packet::metadata(Cid::default(), 0, Opcode::Invalid, PacketError::Error)
                }
            };
            if let Err(e) = self.sink.acknowledge(id, &response) {
                tracing::warn!(request = %id, error = %e, "failed to acknowledge request");
                break;
            }
            handled += 1;
        }
        handled
    }

    /// Turn one request into its response.
    pub fn handle(&self, mut packet: Packet) -> Packet {
        let outcome = match packet.operation() {
            Opcode::Put => self.handle_put(&packet),
            Opcode::Get => self.handle_get(&mut packet),
            Opcode::Invalid => {
                tracing::warn!(cid = %packet.cid(), "invalid opcode submitted");
                PacketError::Error
            }
        };
        if outcome == PacketError::Missing || outcome == PacketError::Error {
            packet.set_length(0);
        }
        packet.set_error(outcome);
        tracing::debug!(
            op = %packet.operation(),
            cid = %packet.cid(),
            length = packet.length(),
            error = %outcome,
            "request answered"
        );
        packet
    }

    fn handle_put(&self, packet: &Packet) -> PacketError {
        let cid = packet.cid();
        if cid.is_empty() {
            tracing::warn!("put without cid");
            return PacketError::Error;
        }
        if packet.size() > MAX_BLOCK_SIZE as u64 || packet.length() > packet.size() {
            tracing::warn!(
                %cid,
                size = packet.size(),
                length = packet.length(),
                "put exceeds block or window size"
            );
            return PacketError::Error;
        }
        let data = match self.sink.buffer().read(packet.offset(), packet.length()) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%cid, error = %e, "put window rejected");
                return PacketError::Error;
            }
        };
        if self.verify_cids && cid.matches(&data) != Some(true) {
            tracing::warn!(%cid, "put bytes do not match cid");
            return PacketError::Error;
        }
        match self.store.put(cid, &data) {
            Ok(()) => PacketError::Ok,
            Err(StoreError::Full { needed, available }) => {
                tracing::warn!(%cid, needed, available, "store full");
                PacketError::Full
            }
            Err(e) => {
                tracing::warn!(%cid, error = %e, "put failed");
                PacketError::Error
            }
        }
    }

    fn handle_get(&self, packet: &mut Packet) -> PacketError {
        let cid = packet.cid().clone();
        if cid.is_empty() {
            tracing::warn!("get without cid");
            return PacketError::Error;
        }
        if let Err(e) = self.sink.buffer().check(packet.offset(), packet.size()) {
            tracing::warn!(%cid, error = %e, "get window rejected");
            return PacketError::Error;
        }
        let block = match self.store.get(&cid) {
            Ok(Some(block)) => block,
            Ok(None) => return PacketError::Missing,
            Err(e) => {
                tracing::warn!(%cid, error = %e, "get failed");
                return PacketError::Error;
            }
        };
        let length = block.len() as u64;
        packet.set_length(length);
        if length > packet.size() {
            return PacketError::Oversize;
        }
        match self.sink.buffer().write(packet.offset(), &block) {
            Ok(()) => PacketError::Ok,
            Err(e) => {
                tracing::warn!(%cid, error = %e, "get window write failed");
                PacketError::Error
            }
        }
    }

    /// Serve until shutdown or until the session is closed.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        tracing::info!(label = %self.sink.label(), "server running");
        loop {
            self.process_pending();
            if self.sink.is_closed() {
                tracing::info!(label = %self.sink.label(), "session closed, server exiting");
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(label = %self.sink.label(), "server shutting down");
                    return Ok(());
                }
                _ = self.sink.wait_packet_avail(), if !self.sink.packet_avail() => {}
                _ = self.sink.wait_ready_to_ack(), if self.sink.packet_avail() => {}
            }
        }
    }
}
