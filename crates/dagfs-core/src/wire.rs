//! DAGFS wire format — the packet record exchanged through the rings.
//!
//! A packet describes one request or its response: a window into the shared
//! communication buffer, the CID of the block, its length, the operation and
//! the outcome. The same record is reused for the response; the server only
//! ever rewrites `cid`, `length` and `error`.
//!
//! Records are #[repr(C, packed)] with zerocopy derives. They live in shared
//! memory between two parties on one host, so fields use native byte order.

use std::fmt;

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::cid::{Cid, MAX_CID_LEN};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum block size in bytes (¼ MiB).
pub const MAX_BLOCK_SIZE: usize = 1 << 18;

/// In-flight descriptors per ring direction.
pub const QUEUE_SIZE: usize = 8;

/// Default communication buffer size for a client session.
pub const DEFAULT_GET_BUF_SIZE: usize = 1 << 20;

/// Capabilities a session consumes: the server-side session object, the
/// session itself, the packet-stream buffer, and two data-flow signals.
pub const CAP_QUOTA: usize = 6;

/// Size of one encoded packet record.
pub const PACKET_RECORD_SIZE: usize = 128;

// ── Opcode / Error ────────────────────────────────────────────────────────────

/// Operation carried by a packet. Set once when the packet is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Put = 0,
    Get = 1,
    /// Placeholder for packets that are not (yet) requests.
    #[default]
    Invalid = 2,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Put),
            1 => Ok(Opcode::Get),
            2 => Ok(Opcode::Invalid),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Opcode::Put => "put",
            Opcode::Get => "get",
            Opcode::Invalid => "invalid",
        })
    }
}

/// Outcome of a request, meaningful on responses only.
///
/// These are normal results, not transport failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketError {
    /// Put or get succeeded.
    #[default]
    Ok = 0,
    /// No block found for a get request.
    Missing = 1,
    /// Get response is larger than the packet window.
    Oversize = 2,
    /// Put failed due to storage exhaustion.
    Full = 3,
    /// Unspecified error, including malformed requests.
    Error = 4,
}

impl PacketError {
    pub fn is_ok(self) -> bool {
        self == PacketError::Ok
    }
}

impl TryFrom<u8> for PacketError {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(PacketError::Ok),
            1 => Ok(PacketError::Missing),
            2 => Ok(PacketError::Oversize),
            3 => Ok(PacketError::Full),
            4 => Ok(PacketError::Error),
            other => Err(WireError::UnknownError(other)),
        }
    }
}

impl From<PacketError> for u8 {
    fn from(err: PacketError) -> u8 {
        err as u8
    }
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacketError::Ok => "ok",
            PacketError::Missing => "missing",
            PacketError::Oversize => "oversize",
            PacketError::Full => "full",
            PacketError::Error => "error",
        })
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A request or response descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    offset: u64,
    size: u64,
    cid: Cid,
    length: u64,
    op: Opcode,
    error: PacketError,
}

impl Packet {
    /// A bare window reservation. Never submitted as a live request.
    pub fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            ..Self::default()
        }
    }

    /// Turn a window reservation into a live request.
    ///
    /// Copies the window, sets `length` to the window size and `error` to OK.
    pub fn request(source: &Packet, cid: Cid, op: Opcode) -> Self {
        Self {
            offset: source.offset,
            size: source.size,
            cid,
            length: source.size,
            op,
            error: PacketError::Ok,
        }
    }

    /// A metadata-only packet with no window.
    pub fn metadata(cid: Cid, length: u64, op: Opcode, error: PacketError) -> Self {
        Self {
            offset: 0,
            size: 0,
            cid,
            length,
            op,
            error,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn operation(&self) -> Opcode {
        self.op
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn error(&self) -> PacketError {
        self.error
    }

    pub fn set_cid(&mut self, cid: Cid) {
        self.cid = cid;
    }

    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub fn set_error(&mut self, error: PacketError) {
        self.error = error;
    }

    /// Encode into the fixed record layout.
    pub fn encode(&self) -> [u8; PACKET_RECORD_SIZE] {
        let (cid, cid_len) = self.cid.to_wire();
        let header = PacketHeader {
            offset: self.offset,
            size: self.size,
            length: self.length,
            cid,
            cid_len,
            operation: self.op.into(),
            error: self.error.into(),
            reserved: [0u8; 5],
        };
        let mut out = [0u8; PACKET_RECORD_SIZE];
        out.copy_from_slice(header.as_bytes());
        out
    }

    /// Decode a record. Anything a well-behaved peer would not produce is
    /// rejected: unknown opcodes or errors, bad CIDs, non-zero reserved bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header =
            PacketHeader::read_from(bytes).ok_or(WireError::BadRecordLength(bytes.len()))?;
        let reserved = header.reserved;
        if reserved != [0u8; 5] {
            return Err(WireError::ReservedBytesSet);
        }
        let cid_bytes = header.cid;
        Ok(Self {
            offset: header.offset,
            size: header.size,
            cid: Cid::from_wire(&cid_bytes, header.cid_len)?,
            length: header.length,
            op: Opcode::try_from(header.operation)?,
            error: PacketError::try_from(header.error)?,
        })
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// On-ring layout of a packet.
///
/// Wire size: 128 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Byte offset of the window in the communication buffer.
    pub offset: u64,
    /// Window size in bytes.
    pub size: u64,
    /// True or intended payload length. May exceed `size` on OVERSIZE.
    pub length: u64,
    /// CID bytes, NUL padded.
    pub cid: [u8; MAX_CID_LEN],
    /// Number of meaningful bytes in `cid`.
    pub cid_len: u8,
    /// Opcode: PUT=0, GET=1, INVALID=2.
    pub operation: u8,
    /// Error: OK=0, MISSING=1, OVERSIZE=2, FULL=3, ERROR=4.
    pub error: u8,
    /// Must be zero.
    pub reserved: [u8; 5],
}

assert_eq_size!(PacketHeader, [u8; PACKET_RECORD_SIZE]);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty cid")]
    EmptyCid,

    #[error("cid length {0} exceeds maximum {}", MAX_CID_LEN)]
    CidTooLong(usize),

    #[error("cid contains invalid character {0:?}")]
    CidInvalidChar(char),

    #[error("cid is not valid utf-8")]
    CidNotUtf8,

    #[error("unknown opcode byte: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("unknown error byte: 0x{0:02x}")]
    UnknownError(u8),

    #[error("packet record must be {} bytes, got {0}", PACKET_RECORD_SIZE)]
    BadRecordLength(usize),

    #[error("reserved bytes are non-zero")]
    ReservedBytesSet,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
