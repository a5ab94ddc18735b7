// src/source/template.rs
use crate::miner::work::{BlockHeaderTemplate, Target};
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Supplier of block header templates
///
/// The dispatcher only consumes this interface; fetching templates from a
/// node or pool is the implementor's business.
pub trait TemplateSource: Send {
    /// Returns the template to mine right now
    fn get_current_template(&mut self) -> Result<BlockHeaderTemplate, MinerError>;

    /// Returns a new template if one arrived since the last call
    ///
    /// Polled once per control cycle. A template returned here supersedes
    /// all outstanding work.
    fn take_update(&mut self) -> Option<BlockHeaderTemplate>;

    /// Returns fresh work once the nonce space of `exhausted` is used up
    ///
    /// The result continues `exhausted`; it must not consume the signal
    /// behind [`TemplateSource::take_update`]. `None` means there is nothing
    /// new to mine.
    fn next_template(&mut self, exhausted: &BlockHeaderTemplate) -> Option<BlockHeaderTemplate>;
}

/// In-process template source fed by [`SharedTemplateSource::publish`]
///
/// Clones share the same slot, so the host can keep one clone to publish
/// from any thread while the dispatcher owns another.
#[derive(Clone)]
pub struct SharedTemplateSource {
    current: Arc<ArcSwap<BlockHeaderTemplate>>,
    updated: Arc<AtomicBool>,
}

impl SharedTemplateSource {
    /// Creates a source holding `initial`
    pub fn new(initial: BlockHeaderTemplate) -> Self {
        SharedTemplateSource {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            updated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the current template and raises the update signal
    pub fn publish(&self, template: BlockHeaderTemplate) {
        self.current.store(Arc::new(template));
        self.updated.store(true, Ordering::SeqCst);
    }

    /// The template most recently published
    pub fn current(&self) -> Arc<BlockHeaderTemplate> {
        self.current.load_full()
    }
}

impl TemplateSource for SharedTemplateSource {
    fn get_current_template(&mut self) -> Result<BlockHeaderTemplate, MinerError> {
        self.updated.store(false, Ordering::SeqCst);
        Ok(self.current.load().as_ref().clone())
    }

    fn take_update(&mut self) -> Option<BlockHeaderTemplate> {
        self.updated
            .swap(false, Ordering::SeqCst)
            .then(|| self.current.load().as_ref().clone())
    }

    fn next_template(&mut self, exhausted: &BlockHeaderTemplate) -> Option<BlockHeaderTemplate> {
        Some(exhausted.rolled(1))
    }
}

/// A single fixed template; no updates, no fresh work
#[derive(Debug, Clone)]
pub struct StaticTemplateSource {
    template: BlockHeaderTemplate,
}

impl StaticTemplateSource {
    /// Creates a source that always hands out `template`
    pub fn new(template: BlockHeaderTemplate) -> Self {
        StaticTemplateSource { template }
    }
}

impl TemplateSource for StaticTemplateSource {
    fn get_current_template(&mut self) -> Result<BlockHeaderTemplate, MinerError> {
        Ok(self.template.clone())
    }

    fn take_update(&mut self) -> Option<BlockHeaderTemplate> {
        None
    }

    fn next_template(&mut self, _exhausted: &BlockHeaderTemplate) -> Option<BlockHeaderTemplate> {
        None
    }
}

/// On-disk template in getblocktemplate style
///
/// Hashes are hex in display (reversed) byte order, `bits` is the compact
/// target as hex, `target` an optional big-endian share target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFile {
    /// Block version
    pub version: i32,
    /// Previous block hash, display order hex
    #[serde(rename = "previousblockhash")]
    pub prev_hash: String,
    /// Merkle root, display order hex
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    /// Header timestamp
    #[serde(rename = "curtime")]
    pub timestamp: u32,
    /// Compact target, e.g. "1d00ffff"
    pub bits: String,
    /// Explicit share target, big-endian hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl TemplateFile {
    /// Reads and converts a JSON template file
    pub fn load(path: impl AsRef<Path>) -> Result<BlockHeaderTemplate, MinerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MinerError::InputError(format!(
                "Failed to read template at {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: TemplateFile = serde_json::from_str(&raw)?;
        file.into_template()
    }

    /// Converts the textual fields into a [`BlockHeaderTemplate`]
    pub fn into_template(self) -> Result<BlockHeaderTemplate, MinerError> {
        let bits = u32::from_str_radix(self.bits.trim_start_matches("0x"), 16)
            .map_err(|e| MinerError::InputError(format!("Invalid bits {:?}: {}", self.bits, e)))?;

        let template = BlockHeaderTemplate::new(
            self.version,
            display_hash(&self.prev_hash)?,
            display_hash(&self.merkle_root)?,
            self.timestamp,
            bits,
        )?;

        match self.target {
            Some(target) => Ok(template.with_target(Target::from_hex(&target)?)),
            None => Ok(template),
        }
    }

    /// Inverse of [`TemplateFile::into_template`]
    pub fn from_template(template: &BlockHeaderTemplate) -> Self {
        let to_display = |hash: &[u8; 32]| {
            let mut bytes = *hash;
            bytes.reverse();
            hex::encode(bytes)
        };
        let target = (template.target != Target::from_compact(template.bits).unwrap_or(Target::ZERO))
            .then(|| template.target.to_string());

        TemplateFile {
            version: template.version,
            prev_hash: to_display(&template.prev_hash),
            merkle_root: to_display(&template.merkle_root),
            timestamp: template.timestamp,
            bits: format!("{:08x}", template.bits),
            target,
        }
    }
}

fn display_hash(s: &str) -> Result<[u8; 32], MinerError> {
    let bytes = hex::decode(s)?;
    let mut hash: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
        MinerError::InputError(format!("hash must be 32 bytes, got {}", v.len()))
    })?;
    hash.reverse();
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::kernel;
    use hex_literal::hex;
    use std::io::Write;

    const GENESIS_JSON: &str = r#"{
        "version": 1,
        "previousblockhash": "0000000000000000000000000000000000000000000000000000000000000000",
        "merkleroot": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        "curtime": 1231006505,
        "bits": "1d00ffff"
    }"#;

    #[test]
    fn template_file_loads_genesis() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GENESIS_JSON.as_bytes()).unwrap();

        let template = TemplateFile::load(file.path()).unwrap();
        assert_eq!(
            template.merkle_root,
            hex!("3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a")
        );
        assert_eq!(
            kernel::hash_header(&template, 2083236893),
            hex!("6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000")
        );

        let back = TemplateFile::from_template(&template);
        assert!(back.target.is_none());
        assert_eq!(back.into_template().unwrap(), template);
    }

    #[test]
    fn template_file_share_target_overrides_bits() {
        let mut file: TemplateFile = serde_json::from_str(GENESIS_JSON).unwrap();
        file.target = Some("00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff".into());
        let template = file.into_template().unwrap();
        assert_ne!(template.target, Target::from_compact(template.bits).unwrap());
        assert_eq!(TemplateFile::from_template(&template).target.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn template_file_rejects_short_hash() {
        let mut file: TemplateFile = serde_json::from_str(GENESIS_JSON).unwrap();
        file.prev_hash = "abcd".into();
        assert!(matches!(file.into_template(), Err(MinerError::InputError(_))));
    }

    fn sample() -> BlockHeaderTemplate {
        BlockHeaderTemplate::new(1, [0; 32], [0; 32], 100, 0x1d00ffff).unwrap()
    }

    #[test]
    fn shared_source_signals_published_templates() {
        let mut source = SharedTemplateSource::new(sample());
        let publisher = source.clone();

        assert_eq!(source.get_current_template().unwrap().timestamp, 100);
        assert!(source.take_update().is_none());

        publisher.publish(sample().rolled(50));
        let update = source.take_update().unwrap();
        assert_eq!(update.timestamp, 150);
        assert!(source.take_update().is_none());
        assert_eq!(publisher.current().timestamp, 150);
    }

    #[test]
    fn shared_source_rolls_timestamp_on_exhaustion() {
        let mut source = SharedTemplateSource::new(sample());
        let current = source.get_current_template().unwrap();
        let next = source.next_template(&current).unwrap();
        assert_eq!(next.timestamp, 101);
        assert_eq!(next.merkle_root, current.merkle_root);
    }

    #[test]
    fn rolling_leaves_pending_update_in_place() {
        let mut source = SharedTemplateSource::new(sample());
        let publisher = source.clone();
        let current = source.get_current_template().unwrap();

        publisher.publish(sample().rolled(500));
        assert_eq!(source.next_template(&current).unwrap().timestamp, 101);
        assert_eq!(source.take_update().unwrap().timestamp, 600);
    }

    #[test]
    fn static_source_never_refreshes() {
        let mut source = StaticTemplateSource::new(sample());
        let current = source.get_current_template().unwrap();
        assert!(source.take_update().is_none());
        assert!(source.next_template(&current).is_none());
    }
}
