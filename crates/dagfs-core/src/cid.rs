//! Content identifiers.
//!
//! A CID names a block by its content. It is a short printable string,
//! at most MAX_CID_LEN bytes, so it fits inline in a packet record.
//! Digest CIDs produced here look like `blake3-<64 hex chars>`, but any
//! printable string within the bound is accepted: whether the bytes behind
//! a CID really hash to it is the caller's business unless the server is
//! configured to verify.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::wire::WireError;

/// Maximum CID length in bytes. Enough for a 256-bit hex digest plus prefix.
pub const MAX_CID_LEN: usize = 96;

/// Prefix of CIDs derived with [`Cid::digest`].
pub const DIGEST_PREFIX: &str = "blake3-";

/// Content identifier embedded in DAGFS packets.
///
/// The empty CID is the placeholder carried by default packets and is never
/// valid on a live request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

impl Cid {
    /// Validate and wrap a textual CID.
    pub fn new(text: impl Into<String>) -> Result<Self, WireError> {
        let text = text.into();
        if text.is_empty() {
            return Err(WireError::EmptyCid);
        }
        if text.len() > MAX_CID_LEN {
            return Err(WireError::CidTooLong(text.len()));
        }
        if let Some(c) = text.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(WireError::CidInvalidChar(c));
        }
        Ok(Self(text))
    }

    /// The canonical CID of a block.
    pub fn digest(data: &[u8]) -> Self {
        Self(format!("{DIGEST_PREFIX}{}", crypto::hash_hex(data)))
    }

    /// Check `data` against this CID.
    ///
    /// Returns None for CIDs that are not digest CIDs, since there is
    /// nothing to check them against.
    pub fn matches(&self, data: &[u8]) -> Option<bool> {
        self.0
            .strip_prefix(DIGEST_PREFIX)
            .map(|hex| hex == crypto::hash_hex(data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NUL-padded inline form and its length, as carried in a packet record.
    pub(crate) fn to_wire(&self) -> ([u8; MAX_CID_LEN], u8) {
        let mut out = [0u8; MAX_CID_LEN];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        // len <= MAX_CID_LEN < 256 by construction
        (out, self.0.len() as u8)
    }

    /// Parse the inline form. A zero length yields the empty placeholder.
    pub(crate) fn from_wire(bytes: &[u8; MAX_CID_LEN], len: u8) -> Result<Self, WireError> {
        let len = usize::from(len);
        if len == 0 {
            return Ok(Self::default());
        }
        if len > MAX_CID_LEN {
            return Err(WireError::CidTooLong(len));
        }
        let text = std::str::from_utf8(&bytes[..len]).map_err(|_| WireError::CidNotUtf8)?;
        Self::new(text)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cid {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Cid {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> String {
        cid.0
    }
}
