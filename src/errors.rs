//! Error types shared across the crate.
//!
//! Every fallible operation surfaces an [`ExtError`]; nothing is retried and
//! nothing is swallowed. Directory entries with an unknown type code are not
//! errors, they show up in listings as `Unknown`.

use std::io;

use thiserror::Error;

/// Result alias used by every fallible operation in the crate.
pub type ExtResult<T> = Result<T, ExtError>;

#[derive(Debug, Error)]
pub enum ExtError {
    /// The superblock signature is not `0xEF53`. Fatal to mounting.
    #[error("not an ext2/ext3/ext4 filesystem (signature {found:#06x})")]
    BadMagic { found: u16 },

    /// The block source could not satisfy a read. Fatal to the current
    /// traversal.
    #[error("block source read failed")]
    Io(#[from] io::Error),

    /// A block number outside the filesystem was requested.
    #[error("block {block} is beyond the filesystem ({total} blocks)")]
    OutOfBounds { block: u64, total: u64 },

    /// The inode number is zero, past the inode count, or lands in a block
    /// group past the descriptor table.
    #[error("inode {inode} is out of range")]
    InodeOutOfRange { inode: u32 },

    /// The block mapping ended before covering the inode's declared size.
    #[error("block mapping exhausted after {walked} of {expected} bytes")]
    MappingExhausted { expected: u64, walked: u64 },

    /// A directory entry with a zero size, or one that runs past the end of
    /// its block.
    #[error("malformed directory entry at byte {offset} of its block")]
    DirEntryMalformed { offset: usize },

    /// The filesystem requires an incompatible feature this decoder does not
    /// implement. Fatal to mounting.
    #[error("required filesystem feature not supported: {0}")]
    UnsupportedFeature(&'static str),

    /// An extent node with a bad magic number or entries running past the
    /// node boundary.
    #[error("corrupt extent node: {0}")]
    CorruptExtentTree(String),

    /// A superblock field combination that cannot describe a real
    /// filesystem.
    #[error("impossible filesystem geometry: {0}")]
    ImpossibleGeometry(&'static str),

    /// The device is too small to hold a superblock.
    #[error("device too small to hold a superblock")]
    ShortSuperblock,
}
