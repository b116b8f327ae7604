//! Classic block-map traversal.
//!
//! ext2/ext3 inodes (and ext4 inodes without the extents flag) map their data
//! through 12 direct pointers followed by single, double and triple indirect
//! pointer blocks. Pointers are 32-bit little-endian block numbers; a pointer
//! of zero is an unallocated hole and stands for a block of zeroes at any
//! level.

use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::dev::BlockDevice;
use crate::errors::{ExtError, ExtResult};
use crate::fs::ext::inode::INODE_BLOCK_FIELD_LEN;
use crate::fs::ext::{dispatch, ExtFs};
use crate::fs::BlockSink;

/// The 15 pointers held in the inode's 60-byte mapping field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockPointers {
    pub direct: [u32; 12],
    pub single: u32,
    pub double: u32,
    pub triple: u32,
}

impl BlockPointers {
    pub(crate) fn parse(field: &[u8; INODE_BLOCK_FIELD_LEN]) -> Self {
        let mut direct = [0u32; 12];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = LittleEndian::read_u32(&field[i * 4..i * 4 + 4]);
        }
        Self {
            direct,
            single: LittleEndian::read_u32(&field[48..52]),
            double: LittleEndian::read_u32(&field[52..56]),
            triple: LittleEndian::read_u32(&field[56..60]),
        }
    }
}

/// Walks the pointer map in on-disk order, handing each data block to the
/// sink truncated to the bytes still owed, until `data_size` is covered.
///
/// Returns [`ExtError::MappingExhausted`] when even the triple-indirect
/// region ends short of `data_size`.
pub(crate) fn walk<D: BlockDevice>(
    fs: &mut ExtFs<D>,
    ptrs: &BlockPointers,
    data_size: u64,
    sink: &mut dyn BlockSink,
) -> ExtResult<()> {
    let bs = fs.geometry().block_size;
    let bs_usize = bs as usize;

    // One scratch buffer per indirection level, reused across the walk.
    let mut data = vec![0u8; bs_usize];
    let mut l1 = vec![0u8; bs_usize];
    let mut l2 = vec![0u8; bs_usize];
    let mut l3 = vec![0u8; bs_usize];

    let mut read_bytes = 0u64;

    trace!(target: "ext-fs", "classic walk, {data_size} bytes");
    for &ptr in &ptrs.direct {
        if read_bytes >= data_size {
            return Ok(());
        }
        fs.read_block_or_hole(u64::from(ptr), &mut data)?;
        dispatch(sink, &data, data_size - read_bytes)?;
        read_bytes += bs;
    }
    if read_bytes >= data_size {
        return Ok(());
    }

    fs.read_block_or_hole(u64::from(ptrs.single), &mut l1)?;
    for c in (0..bs_usize).step_by(4) {
        if read_bytes >= data_size {
            return Ok(());
        }
        let ptr = LittleEndian::read_u32(&l1[c..c + 4]);
        fs.read_block_or_hole(u64::from(ptr), &mut data)?;
        dispatch(sink, &data, data_size - read_bytes)?;
        read_bytes += bs;
    }
    if read_bytes >= data_size {
        return Ok(());
    }

    fs.read_block_or_hole(u64::from(ptrs.double), &mut l2)?;
    for c in (0..bs_usize).step_by(4) {
        if read_bytes >= data_size {
            return Ok(());
        }
        let ptr = LittleEndian::read_u32(&l2[c..c + 4]);
        fs.read_block_or_hole(u64::from(ptr), &mut l1)?;
        for c1 in (0..bs_usize).step_by(4) {
            if read_bytes >= data_size {
                return Ok(());
            }
            let ptr = LittleEndian::read_u32(&l1[c1..c1 + 4]);
            fs.read_block_or_hole(u64::from(ptr), &mut data)?;
            dispatch(sink, &data, data_size - read_bytes)?;
            read_bytes += bs;
        }
    }
    if read_bytes >= data_size {
        return Ok(());
    }

    fs.read_block_or_hole(u64::from(ptrs.triple), &mut l3)?;
    for c in (0..bs_usize).step_by(4) {
        if read_bytes >= data_size {
            return Ok(());
        }
        let ptr = LittleEndian::read_u32(&l3[c..c + 4]);
        fs.read_block_or_hole(u64::from(ptr), &mut l2)?;
        for c1 in (0..bs_usize).step_by(4) {
            if read_bytes >= data_size {
                return Ok(());
            }
            let ptr = LittleEndian::read_u32(&l2[c1..c1 + 4]);
            fs.read_block_or_hole(u64::from(ptr), &mut l1)?;
            for c2 in (0..bs_usize).step_by(4) {
                if read_bytes >= data_size {
                    return Ok(());
                }
                let ptr = LittleEndian::read_u32(&l1[c2..c2 + 4]);
                fs.read_block_or_hole(u64::from(ptr), &mut data)?;
                dispatch(sink, &data, data_size - read_bytes)?;
                read_bytes += bs;
            }
        }
    }
    if read_bytes >= data_size {
        return Ok(());
    }

    Err(ExtError::MappingExhausted {
        expected: data_size,
        walked: read_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_fifteen_pointers_little_endian() {
        let mut field = [0u8; INODE_BLOCK_FIELD_LEN];
        for i in 0..12 {
            LittleEndian::write_u32(&mut field[i * 4..i * 4 + 4], 100 + i as u32);
        }
        LittleEndian::write_u32(&mut field[48..52], 0xDEAD_BEEF);
        LittleEndian::write_u32(&mut field[52..56], 2000);
        LittleEndian::write_u32(&mut field[56..60], 3000);

        let ptrs = BlockPointers::parse(&field);
        assert_eq!(ptrs.direct[0], 100);
        assert_eq!(ptrs.direct[11], 111);
        assert_eq!(ptrs.single, 0xDEAD_BEEF);
        assert_eq!(ptrs.double, 2000);
        assert_eq!(ptrs.triple, 3000);

        // and the raw bytes really are little-endian
        assert_eq!(field[48..52], [0xEF, 0xBE, 0xAD, 0xDE]);
    }
}
