//! Superblock decoding and filesystem geometry.
//!
//! The superblock is a 1024-byte structure starting at byte 1024 of the
//! volume, whatever the block size. Everything the rest of the decoder needs
//! is derived from it once, at mount time, into an immutable [`Geometry`].
//!
//! Copies of the superblock are kept in other block groups, unless the
//! `sparse_super` feature is set in which case backups only exist in groups
//! whose number is 0, 1 or a power of 3, 5 or 7.

use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{ExtError, ExtResult};

/// Filesystem signature, at superblock offset 56.
pub const EXT_SIGNATURE: u16 = 0xEF53;

/// Byte offset of the superblock from the start of the volume.
pub const SUPERBLOCK_OFFSET: usize = 1024;

/// On-disk size of the superblock structure.
pub const SUPERBLOCK_SIZE: usize = 1024;

/// Defines a newtype over one of the superblock's feature bitmaps.
macro_rules! feature_set {
    ($name:ident, $desc:literal) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
        #[repr(transparent)]
        #[doc = $desc]
        pub struct $name(pub u32);

        impl $name {
            /// Checks whether every flag of `flags` is set in this bitmap.
            pub fn includes(self, flags: Self) -> bool {
                self.0 & flags.0 == flags.0
            }
        }
    };
}

feature_set!(
    CompatFeatures,
    "Compatible feature set. The filesystem can be read even when none of \
these are understood."
);

impl CompatFeatures {
    /// Directory preallocation.
    pub const DIR_PREALLOC: Self = Self(0x0001);

    /// AFS magic inodes.
    pub const IMAGIC_INODES: Self = Self(0x0002);

    /// The filesystem keeps a journal.
    pub const HAS_JOURNAL: Self = Self(0x0004);

    /// Extended attributes.
    pub const EXT_ATTR: Self = Self(0x0008);

    /// Space reserved for growing the descriptor table while mounted.
    pub const RESIZE_INODE: Self = Self(0x0010);

    /// Hashed b-tree directory indexes.
    pub const DIR_INDEX: Self = Self(0x0020);
}

feature_set!(
    IncompatFeatures,
    "Incompatible feature set. The filesystem must not be read when one of \
these is set but not understood."
);

impl IncompatFeatures {
    /// Compressed files (not implemented here).
    pub const COMPRESSION: Self = Self(0x0001);

    /// Directory entries carry a file type byte.
    pub const FILETYPE: Self = Self(0x0002);

    /// Journal needs recovery.
    pub const RECOVER: Self = Self(0x0004);

    /// External journal device.
    pub const JOURNAL_DEV: Self = Self(0x0008);

    /// The BGDT is scattered over the first block of each meta block group.
    pub const META_BG: Self = Self(0x0010);

    /// Inodes may map their blocks through extent trees.
    pub const EXTENTS: Self = Self(0x0040);

    /// The filesystem may exceed 2^32 blocks; enables the wide descriptor
    /// layout and the high halves of block counts.
    pub const BITS64: Self = Self(0x0080);

    /// Multiple mount protection.
    pub const MMP: Self = Self(0x0100);

    /// Flexible block groups.
    pub const FLEX_BG: Self = Self(0x0200);

    /// Extended attribute values in their own inodes.
    pub const EA_INODE: Self = Self(0x0400);

    /// Extra data in directory entries.
    pub const DIRDATA: Self = Self(0x1000);

    /// Directories above the usual entry-count limits.
    pub const LARGEDIR: Self = Self(0x4000);

    /// File data stored inside the inode (not implemented here).
    pub const INLINE_DATA: Self = Self(0x8000);

    /// Encrypted files (not implemented here).
    pub const ENCRYPT: Self = Self(0x10000);
}

feature_set!(
    RoCompatFeatures,
    "Read-only compatible feature set. The filesystem can still be read when \
one of these is set but not understood, just not written."
);

impl RoCompatFeatures {
    /// Backup superblocks only in groups 0, 1 and powers of 3, 5, 7.
    pub const SPARSE_SUPER: Self = Self(0x0001);

    /// Files may use the 64-bit size field (`i_size_high`).
    pub const LARGE_FILE: Self = Self(0x0002);

    /// Directory contents in a binary tree.
    pub const BTREE_DIR: Self = Self(0x0004);

    /// Inode block counts may be expressed in filesystem blocks instead of
    /// 512-byte sectors.
    pub const HUGE_FILE: Self = Self(0x0008);

    /// Group descriptors carry checksums.
    pub const GDT_CSUM: Self = Self(0x0010);

    /// Hard link count above 65000 per inode.
    pub const DIR_NLINK: Self = Self(0x0020);

    /// Inodes reserve extra space past the classic 128 bytes.
    pub const EXTRA_ISIZE: Self = Self(0x0040);

    /// Clustered block allocation.
    pub const BIGALLOC: Self = Self(0x0200);
}

/// On-disk superblock layout.
///
/// Field names and widths follow the ext4 layout; only a subset feeds the
/// [`Geometry`] derivation, the rest is kept so the offsets line up.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct RawSuperblock {
    /// Inode count
    pub inodes_count: u32,

    /// Low 32 bits of the block count
    pub blocks_count_lo: u32,

    /// Reserved block count
    pub r_blocks_count_lo: u32,

    /// Free block count
    pub free_blocks_count_lo: u32,

    /// Free inode count
    pub free_inodes_count: u32,

    /// Block containing this superblock
    pub first_data_block: u32,

    /// `log2(block_size) - 10`
    pub log_block_size: u32,

    /// `log2(cluster_size) - 10`, meaningful only with bigalloc
    pub log_cluster_size: u32,

    /// Blocks in each block group
    pub blocks_per_group: u32,

    /// Clusters in each block group
    pub clusters_per_group: u32,

    /// Inodes in each block group
    pub inodes_per_group: u32,

    /// Last mount time
    pub mtime: u32,

    /// Last write time
    pub wtime: u32,

    /// Mounts since the last consistency check
    pub mnt_count: u16,

    /// Mounts allowed before a consistency check
    pub max_mnt_count: u16,

    /// Signature, `0xEF53`
    pub magic: u16,

    /// Filesystem state
    pub state: u16,

    /// Behaviour when detecting errors
    pub errors: u16,

    /// Minor revision level
    pub minor_rev_level: u16,

    /// Time of the last consistency check
    pub lastcheck: u32,

    /// Maximum time between consistency checks
    pub checkinterval: u32,

    /// Creator OS
    pub creator_os: u32,

    /// Major revision level
    pub rev_level: u32,

    /// Default uid for reserved blocks
    pub def_resuid: u16,

    /// Default gid for reserved blocks
    pub def_resgid: u16,

    /// First non-reserved inode
    pub first_ino: u32,

    /// Size of an inode structure in bytes
    pub inode_size: u16,

    /// Block group number of this superblock copy
    pub block_group_nr: u16,

    /// Compatible feature set
    pub feature_compat: CompatFeatures,

    /// Incompatible feature set
    pub feature_incompat: IncompatFeatures,

    /// Read-only compatible feature set
    pub feature_ro_compat: RoCompatFeatures,

    /// Volume UUID
    pub uuid: [u8; 16],

    /// Volume name
    pub volume_name: [u8; 16],

    /// Path the volume was last mounted to
    pub last_mounted: [u8; 64],

    /// Compression algorithm usage bitmap
    algo_bitmap: u32,

    /// Blocks to preallocate for files
    prealloc_blocks: u8,

    /// Blocks to preallocate for directories
    prealloc_dir_blocks: u8,

    /// Descriptor blocks reserved for online growth
    reserved_gdt_blocks: u16,

    /// Journal superblock UUID
    journal_uuid: [u8; 16],

    /// Journal file inode
    journal_inum: u32,

    /// Journal device number
    journal_dev: u32,

    /// Head of the orphan inode list
    last_orphan: u32,

    /// HTREE hash seed
    hash_seed: [u32; 4],

    /// Default hash algorithm
    def_hash_version: u8,

    jnl_backup_type: u8,

    /// Group descriptor size in bytes, meaningful with the 64-bit feature
    pub desc_size: u16,

    /// Default mount options
    default_mount_opts: u32,

    /// First meta block group
    pub first_meta_bg: u32,

    /// Filesystem creation time
    mkfs_time: u32,

    /// Journal inode backup
    jnl_blocks: [u32; 17],

    /// High 32 bits of the block count, meaningful with the 64-bit feature
    pub blocks_count_hi: u32,

    /// High 32 bits of the reserved block count
    r_blocks_count_hi: u32,

    /// High 32 bits of the free block count
    free_blocks_count_hi: u32,

    /// Minimum inode extra size
    min_extra_isize: u16,

    /// Desired inode extra size
    want_extra_isize: u16,

    /// Miscellaneous flags
    flags: u32,

    /// RAID stride
    raid_stride: u16,

    /// Seconds between multi-mount prevention checks
    mmp_interval: u16,

    /// Multi-mount protection block
    mmp_block: u64,

    /// RAID stripe width
    raid_stripe_width: u32,

    /// `log2(groups_per_flex)`, meaningful with flex_bg
    pub log_groups_per_flex: u8,

    /// Metadata checksum algorithm
    checksum_type: u8,

    reserved_pad: u16,

    reserved: [u8; 648],
}

/// Feature bitmaps decoded into the booleans the decoder branches on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    // Incompatible set
    pub compression: bool,
    pub filetype_in_dirent: bool,
    pub meta_bg: bool,
    pub extents: bool,
    pub fs_64bit: bool,
    pub flex_bg: bool,
    pub dirent_data: bool,
    pub large_dir: bool,
    pub inline_data: bool,

    // Read-only compatible set
    pub sparse_super: bool,
    pub large_file: bool,
    pub huge_file: bool,
    pub dir_nlink: bool,
    pub extra_isize: bool,
    pub bigalloc: bool,
}

impl Features {
    fn decode(incompat: IncompatFeatures, ro_compat: RoCompatFeatures) -> Self {
        Self {
            compression: incompat.includes(IncompatFeatures::COMPRESSION),
            filetype_in_dirent: incompat.includes(IncompatFeatures::FILETYPE),
            meta_bg: incompat.includes(IncompatFeatures::META_BG),
            extents: incompat.includes(IncompatFeatures::EXTENTS),
            fs_64bit: incompat.includes(IncompatFeatures::BITS64),
            flex_bg: incompat.includes(IncompatFeatures::FLEX_BG),
            dirent_data: incompat.includes(IncompatFeatures::DIRDATA),
            large_dir: incompat.includes(IncompatFeatures::LARGEDIR),
            inline_data: incompat.includes(IncompatFeatures::INLINE_DATA),

            sparse_super: ro_compat.includes(RoCompatFeatures::SPARSE_SUPER),
            large_file: ro_compat.includes(RoCompatFeatures::LARGE_FILE),
            huge_file: ro_compat.includes(RoCompatFeatures::HUGE_FILE),
            dir_nlink: ro_compat.includes(RoCompatFeatures::DIR_NLINK),
            extra_isize: ro_compat.includes(RoCompatFeatures::EXTRA_ISIZE),
            bigalloc: ro_compat.includes(RoCompatFeatures::BIGALLOC),
        }
    }
}

/// Everything the decoder needs to know about the filesystem, derived from
/// the superblock once at mount time. Immutable afterwards.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub total_inodes: u32,
    pub total_blocks: u64,
    /// `1024 << log_block_size`, always a power of two >= 1024.
    pub block_size: u64,
    /// Allocation cluster size, present only with bigalloc. Recorded but
    /// otherwise unused: cluster allocation does not change how data blocks
    /// are read.
    pub cluster_size: Option<u64>,
    pub blocks_per_group: u64,
    pub inodes_per_group: u64,
    /// 128 on revision-0 filesystems, the superblock field afterwards.
    pub inode_size: u64,
    /// `ceil(total_blocks / blocks_per_group)`
    pub total_block_groups: u64,
    /// First block of the BGDT: 2 when the block size is 1024, 1 otherwise.
    pub bgdt_start_block: u64,
    /// Group descriptor size: 32 unless the 64-bit feature widens it.
    pub desc_size: u64,
    pub desc_per_block: u64,
    pub first_meta_bg: u64,
    pub flex_bg_size: Option<u64>,
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
    pub features: Features,
    pub signature: u16,
    pub major_version: u32,
    pub minor_version: u16,
}

impl Geometry {
    /// Decodes the superblock found at byte 1024 of `head` (the bootstrap
    /// region read from the device).
    pub fn parse(head: &[u8]) -> ExtResult<Self> {
        if head.len() < SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE {
            return Err(ExtError::ShortSuperblock);
        }
        let raw: RawSuperblock =
            pod_read_unaligned(&head[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE]);

        if raw.magic != EXT_SIGNATURE {
            return Err(ExtError::BadMagic { found: raw.magic });
        }

        let features = Features::decode(raw.feature_incompat, raw.feature_ro_compat);
        if features.compression {
            return Err(ExtError::UnsupportedFeature("compression"));
        }
        if features.inline_data {
            return Err(ExtError::UnsupportedFeature("inline data"));
        }
        if raw.feature_incompat.includes(IncompatFeatures::ENCRYPT) {
            return Err(ExtError::UnsupportedFeature("encryption"));
        }

        // ext4 caps blocks at 64 KiB
        if raw.log_block_size > 6 {
            return Err(ExtError::ImpossibleGeometry("block size"));
        }
        let block_size = 1024u64 << raw.log_block_size;

        let total_blocks = if features.fs_64bit {
            (u64::from(raw.blocks_count_hi) << 32) | u64::from(raw.blocks_count_lo)
        } else {
            u64::from(raw.blocks_count_lo)
        };
        if total_blocks == 0 {
            return Err(ExtError::ImpossibleGeometry("zero blocks"));
        }

        let blocks_per_group = u64::from(raw.blocks_per_group);
        let inodes_per_group = u64::from(raw.inodes_per_group);
        if blocks_per_group == 0 || inodes_per_group == 0 {
            return Err(ExtError::ImpossibleGeometry("empty block groups"));
        }

        // Revision 0 predates dynamic inode sizes.
        let inode_size = if raw.rev_level < 1 {
            128
        } else {
            u64::from(raw.inode_size)
        };
        if !inode_size.is_power_of_two() || inode_size < 128 || inode_size > block_size {
            return Err(ExtError::ImpossibleGeometry("inode size"));
        }

        let desc_size = if features.fs_64bit {
            u64::from(raw.desc_size).max(32)
        } else {
            32
        };

        let cluster_size = if features.bigalloc {
            if raw.log_cluster_size > 16 {
                return Err(ExtError::ImpossibleGeometry("cluster size"));
            }
            Some(1024u64 << raw.log_cluster_size)
        } else {
            None
        };

        let flex_bg_size = if features.flex_bg {
            if raw.log_groups_per_flex > 31 {
                return Err(ExtError::ImpossibleGeometry("flex group size"));
            }
            Some(1u64 << raw.log_groups_per_flex)
        } else {
            None
        };

        Ok(Self {
            total_inodes: raw.inodes_count,
            total_blocks,
            block_size,
            cluster_size,
            blocks_per_group,
            inodes_per_group,
            inode_size,
            total_block_groups: total_blocks.div_ceil(blocks_per_group),
            bgdt_start_block: if block_size <= 1024 { 2 } else { 1 },
            desc_size,
            desc_per_block: block_size / desc_size,
            first_meta_bg: if features.meta_bg {
                u64::from(raw.first_meta_bg)
            } else {
                0
            },
            flex_bg_size,
            compat: raw.feature_compat,
            incompat: raw.feature_incompat,
            ro_compat: raw.feature_ro_compat,
            features,
            signature: raw.magic,
            major_version: raw.rev_level,
            minor_version: raw.minor_rev_level,
        })
    }
}

/// Reads the signature field without decoding the rest of the superblock.
pub(crate) fn peek_signature(head: &[u8]) -> ExtResult<u16> {
    if head.len() < SUPERBLOCK_OFFSET + 58 {
        return Err(ExtError::ShortSuperblock);
    }
    Ok(LittleEndian::read_u16(
        &head[SUPERBLOCK_OFFSET + 56..SUPERBLOCK_OFFSET + 58],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bootstrap region holding a minimal valid superblock, with `patch`
    /// applied on top (offsets relative to the superblock start).
    fn head_with(patch: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut head = vec![0u8; 2048];
        let sb = &mut head[SUPERBLOCK_OFFSET..];
        LittleEndian::write_u32(&mut sb[0..4], 8); // total inodes
        LittleEndian::write_u32(&mut sb[4..8], 16); // total blocks
        LittleEndian::write_u32(&mut sb[24..28], 0); // log block size -> 1024
        LittleEndian::write_u32(&mut sb[32..36], 16); // blocks per group
        LittleEndian::write_u32(&mut sb[40..44], 8); // inodes per group
        LittleEndian::write_u16(&mut sb[56..58], EXT_SIGNATURE);
        LittleEndian::write_u32(&mut sb[76..80], 1); // major version
        LittleEndian::write_u16(&mut sb[88..90], 128); // inode size
        patch(sb);
        head
    }

    #[test]
    fn decodes_a_minimal_superblock() {
        let geo = Geometry::parse(&head_with(|_| {})).unwrap();
        assert_eq!(geo.total_inodes, 8);
        assert_eq!(geo.total_blocks, 16);
        assert_eq!(geo.block_size, 1024);
        assert_eq!(geo.blocks_per_group, 16);
        assert_eq!(geo.inodes_per_group, 8);
        assert_eq!(geo.inode_size, 128);
        assert_eq!(geo.total_block_groups, 1);
        assert_eq!(geo.bgdt_start_block, 2);
        assert_eq!(geo.desc_size, 32);
        assert_eq!(geo.desc_per_block, 32);
        assert_eq!(geo.signature, EXT_SIGNATURE);
        assert!(!geo.features.extents);
    }

    #[test]
    fn rejects_a_bad_signature() {
        let head = head_with(|sb| LittleEndian::write_u16(&mut sb[56..58], 0x1234));
        match Geometry::parse(&head) {
            Err(ExtError::BadMagic { found }) => assert_eq!(found, 0x1234),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_a_short_region() {
        assert!(matches!(
            Geometry::parse(&[0u8; 1500]),
            Err(ExtError::ShortSuperblock)
        ));
    }

    #[test]
    fn group_count_rounds_up() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[4..8], 17);
            LittleEndian::write_u32(&mut sb[32..36], 8);
        });
        let geo = Geometry::parse(&head).unwrap();
        assert_eq!(geo.total_block_groups, 3);
        assert!(geo.total_block_groups * geo.blocks_per_group >= geo.total_blocks);
        assert!(
            geo.total_block_groups * geo.blocks_per_group - geo.total_blocks
                < geo.blocks_per_group
        );
    }

    #[test]
    fn revision_zero_forces_128_byte_inodes() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[76..80], 0);
            LittleEndian::write_u16(&mut sb[88..90], 256);
        });
        assert_eq!(Geometry::parse(&head).unwrap().inode_size, 128);
    }

    #[test]
    fn larger_block_sizes_move_the_bgdt() {
        let head = head_with(|sb| LittleEndian::write_u32(&mut sb[24..28], 2));
        let geo = Geometry::parse(&head).unwrap();
        assert_eq!(geo.block_size, 4096);
        assert_eq!(geo.bgdt_start_block, 1);
    }

    #[test]
    fn wide_geometry_uses_the_high_block_count_and_desc_size() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[96..100], IncompatFeatures::BITS64.0);
            LittleEndian::write_u16(&mut sb[254..256], 64);
            LittleEndian::write_u32(&mut sb[336..340], 1); // blocks_count_hi
            LittleEndian::write_u32(&mut sb[32..36], 0x2000_0000);
        });
        let geo = Geometry::parse(&head).unwrap();
        assert_eq!(geo.total_blocks, (1u64 << 32) | 16);
        assert_eq!(geo.desc_size, 64);
        assert_eq!(geo.desc_per_block, 16);
    }

    #[test]
    fn desc_size_is_clamped_to_32() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[96..100], IncompatFeatures::BITS64.0);
            LittleEndian::write_u16(&mut sb[254..256], 16);
        });
        assert_eq!(Geometry::parse(&head).unwrap().desc_size, 32);
    }

    #[test]
    fn bigalloc_records_the_cluster_size() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[100..104], RoCompatFeatures::BIGALLOC.0);
            LittleEndian::write_u32(&mut sb[28..32], 4);
        });
        assert_eq!(Geometry::parse(&head).unwrap().cluster_size, Some(16384));
    }

    #[test]
    fn flex_bg_records_the_group_span() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(&mut sb[96..100], IncompatFeatures::FLEX_BG.0);
            sb[372] = 4;
        });
        assert_eq!(Geometry::parse(&head).unwrap().flex_bg_size, Some(16));
    }

    #[test]
    fn unimplemented_incompat_features_fail_the_mount() {
        for bits in [
            IncompatFeatures::COMPRESSION,
            IncompatFeatures::INLINE_DATA,
            IncompatFeatures::ENCRYPT,
        ] {
            let head = head_with(|sb| LittleEndian::write_u32(&mut sb[96..100], bits.0));
            assert!(matches!(
                Geometry::parse(&head),
                Err(ExtError::UnsupportedFeature(_))
            ));
        }
    }

    #[test]
    fn feature_booleans_follow_the_bitmaps() {
        let head = head_with(|sb| {
            LittleEndian::write_u32(
                &mut sb[96..100],
                IncompatFeatures::FILETYPE.0 | IncompatFeatures::EXTENTS.0,
            );
            LittleEndian::write_u32(
                &mut sb[100..104],
                RoCompatFeatures::SPARSE_SUPER.0 | RoCompatFeatures::LARGE_FILE.0,
            );
        });
        let geo = Geometry::parse(&head).unwrap();
        assert!(geo.features.filetype_in_dirent);
        assert!(geo.features.extents);
        assert!(geo.features.sparse_super);
        assert!(geo.features.large_file);
        assert!(!geo.features.meta_bg);
        assert!(!geo.features.bigalloc);
    }

    #[test]
    fn signature_peek_reads_offset_56() {
        let head = head_with(|_| {});
        assert_eq!(peek_signature(&head).unwrap(), EXT_SIGNATURE);
        assert!(matches!(
            peek_signature(&head[..1024]),
            Err(ExtError::ShortSuperblock)
        ));
    }
}
