use sha2::{Digest, Sha256};
use sha3::Sha3_256;

/// Length of every hex digest produced by this module
pub const DIGEST_HEX_LEN: usize = 64;

/// Hashes the concatenation of `parts` with SHA-256
///
/// Used for transaction hashes, block headers and Merkle inner nodes.
pub fn sha256_hex<T: AsRef<[u8]>>(parts: &[T]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    format!("{:x}", hasher.finalize())
}

/// Hashes the concatenation of `parts` with SHA3-256
///
/// Used for Merkle leaves only.
pub fn sha3_hex<T: AsRef<[u8]>>(parts: &[T]) -> String {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Checks that `hash` starts with `difficulty` zero hex digits
pub fn has_leading_zeros(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
