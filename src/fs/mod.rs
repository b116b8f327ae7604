//! Filesystem decoding.
//!
//! Contains the ext2/ext3/ext4 family decoder together with the small set of
//! types its callers consume: the kind of object a directory entry points at,
//! and the sink abstraction decoded data blocks are pushed through.

use std::fmt;

use crate::errors::ExtResult;

pub mod ext;

/// Kind of object a directory entry points at.
///
/// Codes follow the on-disk directory entry type field; entries read from
/// filesystems without the type field start out as `Unknown` until resolved
/// from the target inode's mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EntryKind {
    #[default]
    Unknown,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl EntryKind {
    /// Decodes the one-byte type code carried in directory entries.
    pub(crate) fn from_dirent_code(code: u8) -> Self {
        match code {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Regular => "File",
            Self::Directory => "Directory",
            Self::CharDevice => "Char device",
            Self::BlockDevice => "Block device",
            Self::Fifo => "FIFO",
            Self::Socket => "Socket",
            Self::Symlink => "Soft link",
        };
        f.write_str(name)
    }
}

/// Consumes decoded data blocks during a mapping walk.
///
/// The walkers hand over each data block truncated to the bytes still covered
/// by the inode's declared size, so the final block of a file arrives
/// partial and never carries padding.
pub trait BlockSink {
    fn consume(&mut self, data: &[u8]) -> ExtResult<()>;
}
