//! # Canonical Hashing
//!
//! All hashes in the ledger are SHA-256 over fields concatenated in declared
//! order. Variable-length fields are length-prefixed so that no two distinct
//! field sequences produce the same input stream.

use sha2::{Digest, Sha256};
use shared_types::Hash;

/// SHA-256 of a single byte string.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental canonical hasher.
///
/// `fixed` feeds fields whose length is implied by the schema (32-byte ids,
/// integers in little-endian form); `field` feeds variable-length byte
/// strings with a `u64` length prefix.
pub struct CanonicalHasher {
    inner: Sha256,
}

impl CanonicalHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Feed a fixed-width field.
    pub fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    /// Feed a `u64` in little-endian form.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_le_bytes());
        self
    }

    /// Feed a variable-length field, length-prefixed.
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn finish(self) -> Hash {
        self.inner.finalize().into()
    }
}

impl Default for CanonicalHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_separates_fields() {
        // ("ab", "c") and ("a", "bc") must hash differently.
        let mut h1 = CanonicalHasher::new();
        h1.field(b"ab").field(b"c");
        let mut h2 = CanonicalHasher::new();
        h2.field(b"a").field(b"bc");
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn deterministic() {
        let mut h1 = CanonicalHasher::new();
        h1.u64(7).fixed(&[1; 32]).field(b"payload");
        let mut h2 = CanonicalHasher::new();
        h2.u64(7).fixed(&[1; 32]).field(b"payload");
        assert_eq!(h1.finish(), h2.finish());
    }
}
