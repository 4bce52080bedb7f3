//! # SHA-2 Hashing
//!
//! One-shot and streaming digests for the three supported SHA-2 widths.

use sha2::{Digest, Sha256, Sha384, Sha512};
use shared_types::HashAlgorithm;

/// Hash data with the given algorithm (one-shot).
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// SHA-256 of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Stateful SHA-2 hasher for documents fed in chunks.
pub enum DocumentHasher {
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-384 state
    Sha384(Sha384),
    /// SHA-512 state
    Sha512(Sha512),
}

impl DocumentHasher {
    /// Create new hasher.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Update with data.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
        self
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = digest(HashAlgorithm::Sha256, b"abc");
        assert_eq!(
            hex::encode(hash),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_output_lengths_match_algorithm() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(digest(alg, b"document").len(), alg.output_len());
        }
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = DocumentHasher::new(HashAlgorithm::Sha384);
        hasher.update(b"hello ").update(b"world");
        assert_eq!(
            hasher.finalize(),
            digest(HashAlgorithm::Sha384, b"hello world")
        );
    }
}
