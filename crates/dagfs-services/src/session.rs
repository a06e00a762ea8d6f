//! Session establishment.
//!
//! A session is requested with an argument string of the form
//!
//!   ram_quota=<n>, cap_quota=<n>, tx_buf_size=<n>, label="<s>"
//!
//! and either comes up whole (a client plus the server end of a fresh
//! channel) or is denied. There is no partially established session.

use dagfs_core::wire::{CAP_QUOTA, DEFAULT_GET_BUF_SIZE, MAX_BLOCK_SIZE};

use crate::channel::{self, Sink};
use crate::client::Client;

pub const PAGE_SIZE: u64 = 4096;

/// Bookkeeping overhead charged on top of the buffer itself.
pub fn required_ram_quota(tx_buf_size: u64) -> u64 {
    32 * 1024 * std::mem::size_of::<usize>() as u64 + tx_buf_size
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session denied: transmission buffer size is zero")]
    ZeroBuffer,

    #[error("session denied: ram quota {provided} below required {needed}")]
    InsufficientRamQuota { needed: u64, provided: u64 },

    #[error("session denied: cap quota {provided} below required {needed}")]
    InsufficientCapQuota { needed: u64, provided: u64 },

    #[error("malformed session arguments: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArgs {
    pub label: String,
    pub tx_buf_size: u64,
    pub ram_quota: u64,
    pub cap_quota: u64,
}

impl SessionArgs {
    /// Arguments that donate exactly the quota a buffer of `tx_buf_size` needs.
    pub fn new(label: impl Into<String>, tx_buf_size: u64) -> Self {
        Self {
            label: label.into(),
            tx_buf_size,
            ram_quota: required_ram_quota(tx_buf_size),
            cap_quota: CAP_QUOTA as u64,
        }
    }

    pub fn with_ram_quota(mut self, ram_quota: u64) -> Self {
        self.ram_quota = ram_quota;
        self
    }

    /// Parse an argument string. Unknown keys are ignored and missing
    /// numeric keys read as 0, which establishment then denies.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let mut args = Self {
            label: String::new(),
            tx_buf_size: 0,
            ram_quota: 0,
            cap_quota: 0,
        };

        for part in split_args(text)? {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| SessionError::Malformed(format!("expected key=value, got {part:?}")))?;
            let value = value.trim();
            match key.trim() {
                "label" => args.label = unquote(value).to_string(),
                "tx_buf_size" => args.tx_buf_size = parse_size(value)?,
                "ram_quota" => args.ram_quota = parse_size(value)?,
                "cap_quota" => args.cap_quota = parse_size(value)?,
                other => tracing::trace!(key = other, "ignoring session argument"),
            }
        }
        Ok(args)
    }

    pub fn to_arg_string(&self) -> String {
        format!(
            "ram_quota={}, cap_quota={}, tx_buf_size={}, label=\"{}\"",
            self.ram_quota, self.cap_quota, self.tx_buf_size, self.label
        )
    }
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self::new("", DEFAULT_GET_BUF_SIZE as u64)
    }
}

/// Split on commas that are not inside double quotes.
fn split_args(text: &str) -> Result<Vec<&str>, SessionError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(SessionError::Malformed("unterminated quote".into()));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Decimal number with an optional K, M or G suffix.
fn parse_size(value: &str) -> Result<u64, SessionError> {
    let (digits, shift) = match value.chars().last() {
        Some('K') => (&value[..value.len() - 1], 10),
        Some('M') => (&value[..value.len() - 1], 20),
        Some('G') => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(1 << shift))
        .ok_or_else(|| SessionError::Malformed(format!("bad size {value:?}")))
}

/// Round up to whole pages. None on overflow.
pub fn align_to_page(size: u64) -> Option<u64> {
    size.checked_add(PAGE_SIZE - 1).map(|s| s & !(PAGE_SIZE - 1))
}

/// Bring up a session: a connected client and the server's end of the channel.
pub fn establish(args: &SessionArgs) -> Result<(Client, Sink), SessionError> {
    if args.tx_buf_size == 0 {
        tracing::warn!(label = %args.label, "session denied: zero buffer");
        return Err(SessionError::ZeroBuffer);
    }
    let tx_buf_size = align_to_page(args.tx_buf_size)
        .ok_or_else(|| SessionError::Malformed(format!("tx_buf_size {} too large", args.tx_buf_size)))?;

    let needed = required_ram_quota(tx_buf_size);
    if args.ram_quota < needed {
        tracing::warn!(label = %args.label, needed, provided = args.ram_quota, "session denied: ram quota");
        return Err(SessionError::InsufficientRamQuota {
            needed,
            provided: args.ram_quota,
        });
    }
    if args.cap_quota < CAP_QUOTA as u64 {
        tracing::warn!(label = %args.label, provided = args.cap_quota, "session denied: cap quota");
        return Err(SessionError::InsufficientCapQuota {
            needed: CAP_QUOTA as u64,
            provided: args.cap_quota,
        });
    }

    let buf_size = usize::try_from(tx_buf_size)
        .map_err(|_| SessionError::Malformed(format!("tx_buf_size {tx_buf_size} too large")))?;
    if buf_size < MAX_BLOCK_SIZE {
        tracing::warn!(
            label = %args.label,
            tx_buf_size,
            "buffer smaller than one maximum block"
        );
    }

    let (source, sink) = channel::open(args.label.clone(), buf_size);
    tracing::info!(label = %args.label, tx_buf_size, "session established");
    Ok((Client::new(source), sink))
}
