//! Block-group descriptor table (BGDT) decoding.
//!
//! Each block group owns a block bitmap, an inode bitmap and a slice of the
//! inode table; the decoder only needs those three locations. Without
//! `meta_bg` the table sits in consecutive blocks right after the superblock;
//! with it, descriptor batches are scattered over the first block of each
//! meta block group, shifted past a backup superblock when one is present.

use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use log::debug;

use crate::dev::BlockDevice;
use crate::errors::ExtResult;
use crate::fs::ext::sb::Geometry;

/// On-disk group descriptor, wide (64-byte) layout. Only the first 32 bytes
/// are meaningful when `desc_size` is 32; the read path zero-extends short
/// descriptors so the high halves come out as zero.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawGroupDesc {
    /// Low 32 bits of the block bitmap location
    block_bitmap_lo: u32,

    /// Low 32 bits of the inode bitmap location
    inode_bitmap_lo: u32,

    /// Low 32 bits of the inode table location
    inode_table_lo: u32,

    /// Low 16 bits of the free block count
    free_blocks_count_lo: u16,

    /// Low 16 bits of the free inode count
    free_inodes_count_lo: u16,

    /// Low 16 bits of the directory count
    used_dirs_count_lo: u16,

    /// Block group flags
    flags: u16,

    /// Low 32 bits of the snapshot exclusion bitmap location
    exclude_bitmap_lo: u32,

    /// Low 16 bits of the block bitmap checksum
    block_bitmap_csum_lo: u16,

    /// Low 16 bits of the inode bitmap checksum
    inode_bitmap_csum_lo: u16,

    /// Low 16 bits of the unused inode count
    itable_unused_lo: u16,

    /// Descriptor checksum
    checksum: u16,

    /// High 32 bits of the block bitmap location
    block_bitmap_hi: u32,

    /// High 32 bits of the inode bitmap location
    inode_bitmap_hi: u32,

    /// High 32 bits of the inode table location
    inode_table_hi: u32,

    /// High 16 bits of the free block count
    free_blocks_count_hi: u16,

    /// High 16 bits of the free inode count
    free_inodes_count_hi: u16,

    /// High 16 bits of the directory count
    used_dirs_count_hi: u16,

    /// High 16 bits of the unused inode count
    itable_unused_hi: u16,

    /// High 32 bits of the snapshot exclusion bitmap location
    exclude_bitmap_hi: u32,

    /// High 16 bits of the block bitmap checksum
    block_bitmap_csum_hi: u16,

    /// High 16 bits of the inode bitmap checksum
    inode_bitmap_csum_hi: u16,

    reserved: u32,
}

/// The three locations the decoder needs from one group descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupDesc {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
}

fn combine(lo: u32, hi: u32, wide: bool) -> u64 {
    if wide {
        (u64::from(hi) << 32) | u64::from(lo)
    } else {
        u64::from(lo)
    }
}

/// Decodes the whole BGDT: one [`GroupDesc`] per block group, in order.
///
/// Walks descriptors with a running in-block counter; a fresh descriptor
/// block is read each time the counter rolls over. Without `meta_bg`, blocks
/// are consecutive from `bgdt_start_block`. With `meta_bg`, each batch starts
/// at `meta_bg_counter * desc_per_block * blocks_per_group`, shifted past the
/// backup superblock when `sparse_super` places one there (and always shifted
/// by one when it does not).
pub(crate) fn load_table<D: BlockDevice>(
    dev: &mut D,
    geo: &Geometry,
) -> ExtResult<Vec<GroupDesc>> {
    let desc_size = geo.desc_size as usize;
    let wide = geo.desc_size > 32 && geo.features.fs_64bit;

    let mut table = Vec::with_capacity(geo.total_block_groups as usize);
    let mut block = vec![0u8; geo.block_size as usize];
    let mut current_block = geo.bgdt_start_block;
    let mut meta_bg_counter = 0u64;
    let mut count = 0u64;

    for _ in 0..geo.total_block_groups {
        if count == 0 {
            if geo.features.meta_bg {
                current_block = meta_bg_counter * geo.desc_per_block * geo.blocks_per_group;
                if geo.features.sparse_super {
                    if has_backup_super(current_block) {
                        current_block += 1;
                    }
                } else {
                    // every group carries a superblock copy
                    current_block += 1;
                }
            }

            debug!(target: "ext-fs", "BGDT batch at block {current_block}");
            dev.read_block(current_block, &mut block)?;

            if geo.features.meta_bg {
                meta_bg_counter += 1;
            } else {
                current_block += 1;
            }
        }

        let offset = count as usize * desc_size;
        let mut widened = [0u8; 64];
        let take = desc_size.min(64);
        widened[..take].copy_from_slice(&block[offset..offset + take]);
        let raw: RawGroupDesc = pod_read_unaligned(&widened);

        table.push(GroupDesc {
            block_bitmap: combine(raw.block_bitmap_lo, raw.block_bitmap_hi, wide),
            inode_bitmap: combine(raw.inode_bitmap_lo, raw.inode_bitmap_hi, wide),
            inode_table: combine(raw.inode_table_lo, raw.inode_table_hi, wide),
        });

        count += 1;
        if count >= geo.desc_per_block {
            count = 0;
        }
    }

    Ok(table)
}

/// Whether a backup superblock sits at this block.
///
/// True for 0 and 1, and whenever repeated division by 3, by 5 or by 7
/// (each pass restarting from the full value) reaches 1 -- that is, for
/// powers of 3, 5 and 7.
pub(crate) fn has_backup_super(block_no: u64) -> bool {
    if block_no == 0 || block_no == 1 {
        return true;
    }

    for base in [3u64, 5, 7] {
        let mut b = block_no;
        while b % base == 0 {
            b /= base;
        }
        if b == 1 {
            return true;
        }
    }

    false
}
