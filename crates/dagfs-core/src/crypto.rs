//! BLAKE3 hashing for block digests and store keys.

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Lowercase hex of the BLAKE3 digest of `data`.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash(data))
}
