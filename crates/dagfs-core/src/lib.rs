//! dagfs-core — shared types, wire format, and configuration.
//! All other DAGFS crates depend on this one.

pub mod cid;
pub mod config;
pub mod crypto;
pub mod wire;

pub use cid::Cid;
pub use wire::{Opcode, Packet, PacketError, WireError};
