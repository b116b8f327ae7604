//! Inode decoding.
//!
//! An inode is the metadata record for one filesystem object. The decoder
//! cares about its size, its flags, its mode (to classify directory entries
//! on filesystems without a type byte) and the 60-byte block-mapping field
//! holding either the classic pointer map or the root of an extent tree.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::fs::ext::sb::Geometry;
use crate::fs::EntryKind;

/// A 1-based inode number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    /// Inode 0 marks an unused directory entry.
    pub const UNUSED: Self = Self(0);

    /// The filesystem's root directory.
    pub const ROOT: Self = Self(2);
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Inode flag word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct InodeFlags(pub u32);

impl InodeFlags {
    /// File is compressed.
    pub const COMPRESSED: Self = Self(0x4);

    /// File has one or more compressed clusters.
    pub const COMPRESSED_CLUSTERS: Self = Self(0x200);

    /// Directory keeps hashed indexes.
    pub const HASH_INDEXED_DIR: Self = Self(0x1000);

    /// Block count is expressed in filesystem blocks, not 512-byte sectors.
    pub const HUGE_FILE: Self = Self(0x4_0000);

    /// The block field holds an extent tree instead of a pointer map.
    pub const USES_EXTENTS: Self = Self(0x8_0000);

    pub fn has(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Length of the mapping field at inode offset 40.
pub const INODE_BLOCK_FIELD_LEN: usize = 60;

/// Size of [`RawInode`]; larger on-disk inodes are truncated to this, smaller
/// ones zero-extended.
pub(crate) const RAW_INODE_SIZE: usize = 160;

/// On-disk inode layout (the 160 bytes this decoder looks at).
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct RawInode {
    /// File mode: type in the high nibble, permissions below
    pub i_mode: u16,

    /// Low 16 bits of the owner uid
    pub i_uid: u16,

    /// Low 32 bits of the size in bytes
    pub i_size_lo: u32,

    /// Last access time
    pub i_atime: u32,

    /// Last inode change time
    pub i_ctime: u32,

    /// Last data modification time
    pub i_mtime: u32,

    /// Deletion time
    pub i_dtime: u32,

    /// Low 16 bits of the gid
    pub i_gid: u16,

    /// Hard link count
    pub i_links_count: u16,

    /// Low 32 bits of the block count
    pub i_blocks_lo: u32,

    /// Inode flags
    pub i_flags: InodeFlags,

    /// OS-specific word / version
    pub i_version: u32,

    /// Block map or extent tree
    pub i_block: [u8; INODE_BLOCK_FIELD_LEN],

    /// File version
    pub i_generation: u32,

    /// Low 32 bits of the extended attribute block
    pub i_file_acl_lo: u32,

    /// High 32 bits of the size in bytes
    pub i_size_high: u32,

    /// Fragment address (obsolete)
    pub i_faddr: u32,

    /// High 16 bits of the block count
    pub i_blocks_high: u16,

    /// High 16 bits of the extended attribute block
    pub i_file_acl_high: u16,

    /// High 16 bits of the owner uid
    pub i_uid_high: u16,

    /// High 16 bits of the gid
    pub i_gid_high: u16,

    /// Low 16 bits of the inode checksum
    pub i_checksum_lo: u16,

    reserved: u16,

    /// Bytes this inode uses past the classic 128
    pub i_extra_isize: u16,

    /// High 16 bits of the inode checksum
    pub i_checksum_hi: u16,

    /// Extra change time bits
    i_ctime_extra: u32,

    /// Extra modification time bits
    i_mtime_extra: u32,

    /// Extra access time bits
    i_atime_extra: u32,

    /// File creation time
    i_crtime: u32,

    /// Extra creation time bits
    i_crtime_extra: u32,

    /// High 32 bits of the version
    i_version_hi: u32,

    /// Project id
    i_projid: u32,
}

/// A decoded inode, built for one navigation step and discarded afterwards.
#[derive(Clone, Debug)]
pub struct Inode {
    pub number: InodeNumber,

    /// Size in bytes of the data this inode maps.
    pub size: u64,

    /// Block count as recorded in the inode (low 32 bits plus a 16-bit high
    /// half).
    pub block_count: u64,

    /// Size of the on-disk inode structure itself: `i_extra_isize + 128`.
    pub struct_size: u32,

    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub links: u16,

    pub flags: InodeFlags,

    /// The raw 60-byte mapping field: classic pointers or an extent tree,
    /// depending on [`InodeFlags::USES_EXTENTS`].
    pub block: [u8; INODE_BLOCK_FIELD_LEN],
}

impl Inode {
    pub(crate) fn decode(number: InodeNumber, raw: &RawInode, geo: &Geometry) -> Self {
        // The high size word only exists on filesystems with the large-file
        // feature; a zero high word keeps the plain 32-bit size either way.
        let size = if geo.features.large_file && raw.i_size_high > 0 {
            (u64::from(raw.i_size_high) << 32) | u64::from(raw.i_size_lo)
        } else {
            u64::from(raw.i_size_lo)
        };

        let block_count = (u64::from(raw.i_blocks_high) << 32) | u64::from(raw.i_blocks_lo);

        Self {
            number,
            size,
            block_count,
            struct_size: u32::from(raw.i_extra_isize) + 128,
            mode: raw.i_mode,
            uid: (u32::from(raw.i_uid_high) << 16) | u32::from(raw.i_uid),
            gid: (u32::from(raw.i_gid_high) << 16) | u32::from(raw.i_gid),
            links: raw.i_links_count,
            flags: raw.i_flags,
            block: raw.i_block,
        }
    }

    /// Classifies this inode from the type nibble of its mode.
    pub fn kind(&self) -> EntryKind {
        match self.mode & 0xF000 {
            0x1000 => EntryKind::Fifo,
            0x2000 => EntryKind::CharDevice,
            0x4000 => EntryKind::Directory,
            0x6000 => EntryKind::BlockDevice,
            0x8000 => EntryKind::Regular,
            0xA000 => EntryKind::Symlink,
            0xC000 => EntryKind::Socket,
            _ => EntryKind::Unknown,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Whether the block field holds an extent tree. The filesystem-level
    /// extents feature must also be set for the tree to be walked.
    pub fn uses_extents(&self) -> bool {
        self.flags.has(InodeFlags::USES_EXTENTS)
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::Zeroable;
    use byteorder::{ByteOrder, LittleEndian};

    use super::*;
    use crate::fs::ext::sb::{Geometry, EXT_SIGNATURE, SUPERBLOCK_OFFSET};

    fn geometry(large_file: bool) -> Geometry {
        let mut head = vec![0u8; 2048];
        let sb = &mut head[SUPERBLOCK_OFFSET..];
        LittleEndian::write_u32(&mut sb[0..4], 8);
        LittleEndian::write_u32(&mut sb[4..8], 16);
        LittleEndian::write_u32(&mut sb[24..28], 2); // 4096-byte blocks
        LittleEndian::write_u32(&mut sb[32..36], 16);
        LittleEndian::write_u32(&mut sb[40..44], 8);
        LittleEndian::write_u16(&mut sb[56..58], EXT_SIGNATURE);
        LittleEndian::write_u32(&mut sb[76..80], 1);
        LittleEndian::write_u16(&mut sb[88..90], 256);
        if large_file {
            LittleEndian::write_u32(&mut sb[100..104], 0x2); // RO_COMPAT large_file
        }
        Geometry::parse(&head).unwrap()
    }

    #[test]
    fn size_uses_the_high_word_only_with_large_file() {
        let mut raw = RawInode::zeroed();
        raw.i_size_lo = 0;
        raw.i_size_high = 1;

        let wide = Inode::decode(InodeNumber(3), &raw, &geometry(true));
        assert_eq!(wide.size, 1u64 << 32);

        let narrow = Inode::decode(InodeNumber(3), &raw, &geometry(false));
        assert_eq!(narrow.size, 0);
    }

    #[test]
    fn zero_high_word_keeps_the_32_bit_size() {
        let mut raw = RawInode::zeroed();
        raw.i_size_lo = 1500;
        let inode = Inode::decode(InodeNumber(3), &raw, &geometry(true));
        assert_eq!(inode.size, 1500);
    }

    #[test]
    fn block_count_combines_a_16_bit_high_half() {
        let mut raw = RawInode::zeroed();
        raw.i_blocks_lo = 7;
        raw.i_blocks_high = 2;
        let inode = Inode::decode(InodeNumber(3), &raw, &geometry(false));
        assert_eq!(inode.block_count, (2u64 << 32) | 7);
    }

    #[test]
    fn struct_size_adds_the_extra_bytes_to_128() {
        let mut raw = RawInode::zeroed();
        raw.i_extra_isize = 32;
        let inode = Inode::decode(InodeNumber(3), &raw, &geometry(false));
        assert_eq!(inode.struct_size, 160);
    }

    #[test]
    fn flags_and_mode_classify_the_inode() {
        let mut raw = RawInode::zeroed();
        raw.i_mode = 0x8000 | 0o644;
        raw.i_flags = InodeFlags(InodeFlags::USES_EXTENTS.0 | InodeFlags::HUGE_FILE.0);
        let inode = Inode::decode(InodeNumber(3), &raw, &geometry(false));
        assert_eq!(inode.kind(), EntryKind::Regular);
        assert!(inode.uses_extents());
        assert!(inode.flags.has(InodeFlags::HUGE_FILE));
        assert!(!inode.flags.has(InodeFlags::COMPRESSED));
    }
}
