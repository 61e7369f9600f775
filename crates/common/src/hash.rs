//! Content hashing for shot images
//!
//! Images are identified by the SHA-256 digest of their encoded bytes. The
//! digest is what the upload negotiation exchanges with the platform, so two
//! byte-identical screenshots always share a hash regardless of their name.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex digest of a buffer
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
