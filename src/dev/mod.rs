//! Block source abstraction.
//!
//! Every byte the decoder looks at comes through [`BlockDevice::read_block`].
//! Two backends are provided: [`ImageSource`] reads a byte-addressable image
//! or raw device, [`IndirectSource`] reads a keyed store that maps filesystem
//! block numbers to stored payloads. Selecting a backend is a
//! construction-time decision; the decoder itself never branches on it.

pub mod image;
pub mod store;

pub use image::ImageSource;
pub use store::{BlockMap, IndirectSource};

use crate::errors::ExtResult;

/// A raw byte source addressed by filesystem block number.
///
/// `buf.len()` is the filesystem block size: block `n` covers device bytes
/// `n * buf.len() .. (n + 1) * buf.len()`. Implementations must fill the
/// whole buffer or fail; a short read is an error.
pub trait BlockDevice {
    fn read_block(&mut self, block_no: u64, buf: &mut [u8]) -> ExtResult<()>;

    /// Reads the bootstrap region at the start of the volume: the boot block
    /// and, when it fits, the superblock that follows it at byte 1024.
    ///
    /// This runs before the filesystem block size is known. The default
    /// implementation reads a 4096-byte block 0, which covers the superblock
    /// for every legal block size; keyed stores instead return stored block 0
    /// at whatever size it was captured with, and the mount path fetches
    /// block 1 as well when that is not enough.
    fn read_bootstrap(&mut self) -> ExtResult<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        self.read_block(0, &mut buf)?;
        Ok(buf)
    }
}
