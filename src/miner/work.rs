// src/miner/work.rs
//! Work description types shared by the control core and the accelerators
//!
//! Everything here is a value object: templates are shared through `Arc`
//! and never mutated once issued, units and results are moved across the
//! control/accelerator boundary by value.

use crate::miner::pool::ContextId;
use crate::utils::error::MinerError;
use bitcoin::block::{Header, Version};
use bitcoin::consensus;
use bitcoin::hashes::Hash;
use bitcoin::pow::{self, CompactTarget};
use bitcoin::{BlockHash, TxMerkleNode};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Size of the 32-bit nonce space, as an exclusive upper bound
pub const NONCE_SPACE: u64 = 1 << 32;

/// A 256-bit difficulty threshold, stored big-endian
///
/// Expansion, compact encoding and hash comparison go through
/// [`bitcoin::pow::Target`]; the byte form keeps the constants `const`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// The easiest possible target; every hash meets it
    pub const MAX: Target = Target([0xff; 32]);

    /// Only the all-zero hash meets this target
    pub const ZERO: Target = Target([0; 32]);

    /// Builds a target from its big-endian byte representation
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Target(bytes)
    }

    /// Returns the big-endian byte representation
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Parses a 64 character big-endian hex string
    pub fn from_hex(s: &str) -> Result<Self, MinerError> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            MinerError::InputError(format!("target must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Target(bytes))
    }

    /// Expands the compact ("nBits") encoding
    ///
    /// Negative values and values that do not fit in 256 bits are rejected
    /// instead of being clamped.
    pub fn from_compact(bits: u32) -> Result<Self, MinerError> {
        let size = bits >> 24;
        let mantissa = bits & 0x007f_ffff;

        if mantissa == 0 {
            return Ok(Target::ZERO);
        }
        if bits & 0x0080_0000 != 0 {
            return Err(MinerError::InputError(format!(
                "compact target {:#010x} is negative",
                bits
            )));
        }
        if size > 34 || (mantissa > 0xff && size > 33) || (mantissa > 0xffff && size > 32) {
            return Err(MinerError::InputError(format!(
                "compact target {:#010x} overflows 256 bits",
                bits
            )));
        }

        Ok(Target::from_pow(pow::Target::from_compact(
            CompactTarget::from_consensus(bits),
        )))
    }

    /// Encodes the target in compact form, truncating to 3 significant bytes
    pub fn to_compact(self) -> u32 {
        self.to_pow().to_compact_lossy().to_consensus()
    }

    /// Converts into the `bitcoin` crate's target type
    pub fn to_pow(self) -> pow::Target {
        pow::Target::from_be_bytes(self.0)
    }

    /// Converts from the `bitcoin` crate's target type
    pub fn from_pow(target: pow::Target) -> Self {
        Target(target.to_be_bytes())
    }

    /// Whether `hash` (raw SHA-256 output, little-endian number) is at or
    /// below this target
    pub fn is_met_by(&self, hash: &[u8; 32]) -> bool {
        self.to_pow().is_met_by(BlockHash::from_byte_array(*hash))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", hex::encode(self.0))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Block header fields minus the nonce
///
/// Serializes through [`bitcoin::block::Header`] to the standard 80-byte
/// layout, nonce in the last four bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderTemplate {
    /// Block version
    pub version: i32,
    /// Hash of the previous block, internal byte order
    pub prev_hash: [u8; 32],
    /// Merkle root of the block's transactions, internal byte order
    pub merkle_root: [u8; 32],
    /// Block timestamp (unix seconds)
    pub timestamp: u32,
    /// Difficulty target in compact form
    pub bits: u32,
    /// Expanded threshold a hash must meet
    ///
    /// Normally the expansion of `bits`; pools may hand out an easier share
    /// target through [`BlockHeaderTemplate::with_target`].
    pub target: Target,
}

impl BlockHeaderTemplate {
    /// Serialized header length in bytes
    pub const SIZE: usize = 80;

    /// Offset of the nonce within the serialized header
    pub const NONCE_OFFSET: usize = 76;

    /// Creates a template whose target is the expansion of `bits`
    pub fn new(
        version: i32,
        prev_hash: [u8; 32],
        merkle_root: [u8; 32],
        timestamp: u32,
        bits: u32,
    ) -> Result<Self, MinerError> {
        Ok(BlockHeaderTemplate {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            bits,
            target: Target::from_compact(bits)?,
        })
    }

    /// Builds a template from a consensus header, dropping its nonce
    pub fn from_header(header: &Header) -> Result<Self, MinerError> {
        BlockHeaderTemplate::new(
            header.version.to_consensus(),
            header.prev_blockhash.to_byte_array(),
            header.merkle_root.to_byte_array(),
            header.time,
            header.bits.to_consensus(),
        )
    }

    /// Replaces the target with an explicit (share) target
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Returns a copy with the timestamp moved forward
    pub fn rolled(&self, seconds: u32) -> Self {
        let mut next = self.clone();
        next.timestamp = next.timestamp.wrapping_add(seconds);
        next
    }

    /// The consensus header with `nonce` filled in
    pub fn header(&self, nonce: u32) -> Header {
        Header {
            version: Version::from_consensus(self.version),
            prev_blockhash: BlockHash::from_byte_array(self.prev_hash),
            merkle_root: TxMerkleNode::from_byte_array(self.merkle_root),
            time: self.timestamp,
            bits: CompactTarget::from_consensus(self.bits),
            nonce,
        }
    }

    /// Serializes the header with `nonce` filled in
    pub fn to_bytes(&self, nonce: u32) -> [u8; Self::SIZE] {
        let encoded = consensus::serialize(&self.header(nonce));
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(&encoded);
        out
    }

    /// Parses a serialized header, returning the template and its nonce
    ///
    /// # Errors
    /// `MalformedHeader` if `bytes` is not exactly 80 bytes long or the
    /// compact target is invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, u32), MinerError> {
        let header: Header = consensus::deserialize(bytes).map_err(|e| {
            MinerError::MalformedHeader(format!("{} ({} bytes)", e, bytes.len()))
        })?;
        let template = BlockHeaderTemplate::from_header(&header)
            .map_err(|e| MinerError::MalformedHeader(e.to_string()))?;
        Ok((template, header.nonce))
    }
}

/// One hashing task: a template plus a nonce range `[nonce_start, nonce_end)`
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Template the unit was cut from
    pub template: Arc<BlockHeaderTemplate>,
    /// First nonce to try
    pub nonce_start: u64,
    /// One past the last nonce to try
    pub nonce_end: u64,
    /// Template generation tag, used to discard stale results
    pub generation: u64,
    /// Context the unit was handed to, set by the pool on submission
    pub accelerator: Option<ContextId>,
    /// When the unit was created
    pub issued_at: Instant,
}

impl WorkUnit {
    /// Creates an unassigned unit
    ///
    /// # Panics
    /// If the range is empty or reaches past the 32-bit nonce space.
    pub fn new(
        template: Arc<BlockHeaderTemplate>,
        generation: u64,
        nonce_start: u64,
        nonce_end: u64,
    ) -> Self {
        assert!(
            nonce_start < nonce_end && nonce_end <= NONCE_SPACE,
            "invalid nonce range [{}, {})",
            nonce_start,
            nonce_end
        );
        WorkUnit {
            template,
            nonce_start,
            nonce_end,
            generation,
            accelerator: None,
            issued_at: Instant::now(),
        }
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.nonce_end - self.nonce_start
    }

    /// Always false; ranges are non-empty by construction
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether both units belong to the same generation and share a nonce
    pub fn overlaps(&self, other: &WorkUnit) -> bool {
        self.generation == other.generation
            && self.nonce_start < other.nonce_end
            && other.nonce_start < self.nonce_end
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen {} [{:#010x}, {:#011x})",
            self.generation, self.nonce_start, self.nonce_end
        )
    }
}

/// Outcome of one work unit, produced on an accelerator
#[derive(Debug, Clone)]
pub struct HashResult {
    /// The unit this result answers
    pub unit: WorkUnit,
    /// Context that computed it
    pub context: ContextId,
    /// Winning hash, or the lowest hash seen when nothing met the target
    pub best_hash: [u8; 32],
    /// Nonce that produced `best_hash`
    pub nonce: u32,
    /// Whether `best_hash` meets the unit's target
    pub meets_target: bool,
    /// Number of nonces actually hashed
    pub hashes: u64,
}

/// Cuts one template's nonce space into non-overlapping work units
#[derive(Debug, Clone)]
pub struct NoncePartition {
    template: Arc<BlockHeaderTemplate>,
    generation: u64,
    next: u64,
    limit: u64,
    unit_size: u64,
}

impl NoncePartition {
    /// Creates a partition covering `[0, limit)` in steps of `unit_size`
    ///
    /// `limit` is clamped to the nonce space and `unit_size` to at least 1.
    pub fn new(
        template: Arc<BlockHeaderTemplate>,
        generation: u64,
        unit_size: u64,
        limit: u64,
    ) -> Self {
        NoncePartition {
            template,
            generation,
            next: 0,
            limit: limit.min(NONCE_SPACE),
            unit_size: unit_size.max(1),
        }
    }

    /// Template being partitioned
    pub fn template(&self) -> &Arc<BlockHeaderTemplate> {
        &self.template
    }

    /// Generation tag stamped on every unit
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether every nonce has been handed out
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.limit
    }

    /// Cuts the next unit, or `None` once exhausted
    pub fn next_unit(&mut self) -> Option<WorkUnit> {
        if self.is_exhausted() {
            return None;
        }
        let start = self.next;
        let end = (start + self.unit_size).min(self.limit);
        self.next = end;
        Some(WorkUnit::new(
            Arc::clone(&self.template),
            self.generation,
            start,
            end,
        ))
    }
}
