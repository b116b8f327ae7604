//! File extraction.

use std::io::Write;

use crate::errors::ExtResult;
use crate::fs::BlockSink;

/// Streams decoded data blocks into any [`Write`] sink.
///
/// Blocks arrive from the walkers already truncated to the inode's declared
/// size, so the writer never sees padding past the end of the file.
pub struct ExtractSink<W> {
    out: W,
    bytes: u64,
    blocks: u64,
}

impl<W: Write> ExtractSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            bytes: 0,
            blocks: 0,
        }
    }

    /// Total bytes handed to the writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Number of data blocks consumed so far.
    pub fn blocks_consumed(&self) -> u64 {
        self.blocks
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> BlockSink for ExtractSink<W> {
    fn consume(&mut self, data: &[u8]) -> ExtResult<()> {
        self.out.write_all(data)?;
        self.bytes += data.len() as u64;
        self.blocks += 1;
        Ok(())
    }
}
