// src/miner/kernel.rs
//! Double SHA-256 hash kernel
//!
//! The code every accelerator runs: hash a header with a given nonce,
//! compare against the target, and scan a contiguous nonce range.
//! Everything here is a pure function of its inputs.

use crate::miner::work::{BlockHeaderTemplate, NONCE_SPACE, Target};
use bitcoin::BlockHash;
use bitcoin::hashes::Hash;
use sha2::{Digest, Sha256};

/// Result of scanning one nonce range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Nonce of the first hash meeting the target, if any
    pub found: Option<u32>,
    /// Nonce that produced `best_hash`
    pub best_nonce: u32,
    /// Winning hash, or the numerically lowest hash seen
    pub best_hash: [u8; 32],
    /// Number of nonces hashed
    pub hashes: u64,
}

impl ScanOutcome {
    /// Whether the scan stopped on a qualifying nonce
    pub fn meets_target(&self) -> bool {
        self.found.is_some()
    }
}

/// Computes `SHA256(SHA256(header_with_nonce))` in raw byte order
///
/// Goes through the consensus header; [`scan`] is the fast path.
pub fn hash_header(template: &BlockHeaderTemplate, nonce: u32) -> [u8; 32] {
    template.header(nonce).block_hash().to_byte_array()
}

/// Whether `hash` is numerically at or below `target`
pub fn meets_target(hash: &[u8; 32], target: &Target) -> bool {
    target.is_met_by(hash)
}

/// Numeric "less than" for raw (little-endian) hashes
fn lower_hash(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().rev().lt(b.iter().rev())
}

/// Scans `[start, end)` in increasing nonce order
///
/// Stops at the first nonce whose hash meets the template's target. When no
/// nonce qualifies, the outcome carries the lowest hash observed.
///
/// # Panics
/// If the range is empty or extends past the 32-bit nonce space.
pub fn scan(template: &BlockHeaderTemplate, start: u64, end: u64) -> ScanOutcome {
    assert!(
        start < end && end <= NONCE_SPACE,
        "invalid nonce range [{}, {})",
        start,
        end
    );

    let header = template.to_bytes(0);
    let target = template.target.to_pow();

    // First 64 bytes never change with the nonce
    let mut midstate = Sha256::new();
    midstate.update(&header[..64]);
    let mut tail = [0u8; 16];
    tail.copy_from_slice(&header[64..]);

    let mut best_hash = [0xffu8; 32];
    let mut best_nonce = start as u32;
    let mut hashes = 0u64;

    for nonce in start..end {
        let nonce = nonce as u32;
        tail[12..].copy_from_slice(&nonce.to_le_bytes());

        let mut hasher = midstate.clone();
        hasher.update(tail);
        let hash: [u8; 32] = Sha256::digest(hasher.finalize()).into();
        hashes += 1;

        if target.is_met_by(BlockHash::from_byte_array(hash)) {
            return ScanOutcome {
                found: Some(nonce),
                best_nonce: nonce,
                best_hash: hash,
                hashes,
            };
        }
        if hashes == 1 || lower_hash(&hash, &best_hash) {
            best_hash = hash;
            best_nonce = nonce;
        }
    }

    ScanOutcome {
        found: None,
        best_nonce,
        best_hash,
        hashes,
    }
}
