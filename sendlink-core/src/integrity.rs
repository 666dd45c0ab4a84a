//! Integrity: whole-file SHA-256, computed incrementally over plaintext chunks.

use sha2::{Digest, Sha256};

/// Incremental file digest. Sender and receiver each feed the plaintext in order.
#[derive(Clone, Default)]
pub struct FileDigest {
    hasher: Sha256,
    bytes: u64,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

/// One-shot SHA-256.
pub fn hash_bytes(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Compare digests without early exit.
pub fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut digest = FileDigest::new();
        for chunk in data.chunks(333) {
            digest.update(chunk);
        }
        assert_eq!(digest.bytes(), data.len() as u64);
        assert_eq!(digest.finalize(), hash_bytes(&data));
    }

    #[test]
    fn empty_digest_is_sha256_of_nothing() {
        assert_eq!(FileDigest::new().finalize(), hash_bytes(b""));
    }

    #[test]
    fn match_detects_difference() {
        let a = hash_bytes(b"hello chunk");
        let b = hash_bytes(b"tampered");
        assert!(digests_match(&a, &a));
        assert!(!digests_match(&a, &b));
    }
}
