//! Synthetic CPU load: a chain of SHA-256 rounds.

use sha2::{Digest, Sha256};

/// Hash `seed`, then re-hash the digest `rounds` more times.
///
/// The cost is linear in `rounds` and the result depends on every input byte,
/// so it cannot be skipped or cached by the caller.
pub fn burn(seed: &[u8], rounds: u32) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::digest(seed).into();
    for _ in 0..rounds {
        digest = Sha256::digest(digest).into();
    }
    digest
}
