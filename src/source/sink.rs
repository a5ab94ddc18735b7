// src/source/sink.rs
use crate::miner::kernel;
use crate::miner::work::BlockHeaderTemplate;
use crate::utils::error::MinerError;
use crossbeam_channel::Sender;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A solved header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Template the nonce solves
    pub header: BlockHeaderTemplate,
    /// Winning nonce
    pub nonce: u32,
}

impl Solution {
    /// Serialized 80-byte header with the nonce filled in
    pub fn header_bytes(&self) -> [u8; BlockHeaderTemplate::SIZE] {
        self.header.to_bytes(self.nonce)
    }

    /// Double SHA-256 of the solved header
    pub fn hash(&self) -> [u8; 32] {
        kernel::hash_header(&self.header, self.nonce)
    }
}

/// Receiver of solved headers
///
/// Submission to a node or pool is the implementor's business.
pub trait SolutionSink: Send {
    /// Called once per accepted solution
    fn report_solution(&mut self, header: &BlockHeaderTemplate, nonce: u32) -> Result<(), MinerError>;
}

/// Appends solutions to a share log file
///
/// One line per solution: `<unix seconds> <header hex> <nonce>`.
pub struct ShareLog {
    path: PathBuf,
    file: File,
}

impl ShareLog {
    /// Opens (or creates) the share log at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MinerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ShareLog { path, file })
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SolutionSink for ShareLog {
    fn report_solution(&mut self, header: &BlockHeaderTemplate, nonce: u32) -> Result<(), MinerError> {
        let solution = Solution {
            header: header.clone(),
            nonce,
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        writeln!(
            self.file,
            "{} {} {}",
            now,
            hex::encode(solution.header_bytes()),
            nonce
        )?;
        self.file.flush()?;

        let mut display = solution.hash();
        display.reverse();
        log::info!(
            "Solution found: nonce {:#010x}, hash {}",
            nonce,
            hex::encode(display)
        );
        Ok(())
    }
}

/// Forwards solutions over a channel
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Solution>,
}

impl ChannelSink {
    /// Creates a sink sending into `tx`
    pub fn new(tx: Sender<Solution>) -> Self {
        ChannelSink { tx }
    }
}

impl SolutionSink for ChannelSink {
    fn report_solution(&mut self, header: &BlockHeaderTemplate, nonce: u32) -> Result<(), MinerError> {
        self.tx.send(Solution {
            header: header.clone(),
            nonce,
        })?;
        Ok(())
    }
}
