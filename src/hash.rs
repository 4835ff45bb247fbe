//! Hashing helpers. SHA-256 gates file freshness and keys the embedding
//! cache; FNV-1a derives chunk ids, where stability and speed matter but
//! collision resistance does not.

use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 64-bit FNV-1a over the input bytes.
pub fn fnv1a_64(data: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in data.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
