//! ext2/ext3/ext4 family decoder.
//!
//! [`ExtFs`] is the navigator. It owns the block device, the [`Geometry`]
//! decoded from the superblock and the block-group descriptor table -- both
//! immutable after [`ExtFs::mount`] -- and drives inode fetches, directory
//! listings and file extraction on top of them. There is no other state:
//! dropping the navigator aborts whatever it was doing.

use std::io::Write;

use bytemuck::pod_read_unaligned;
use log::{debug, info, warn};

use crate::dev::BlockDevice;
use crate::errors::{ExtError, ExtResult};
use crate::fs::BlockSink;

pub(crate) mod blkmap;
pub mod block_grp;
pub mod dir;
pub(crate) mod extent;
pub mod file;
pub mod inode;
pub mod sb;

use blkmap::BlockPointers;
use block_grp::GroupDesc;
use dir::{DirCollector, DirEntry};
use file::ExtractSink;
use inode::{Inode, InodeNumber, RawInode, RAW_INODE_SIZE};
use sb::{Geometry, EXT_SIGNATURE, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};

/// Hands `block` to the sink truncated to the bytes still owed, so the final
/// block of a file never carries padding.
pub(crate) fn dispatch(sink: &mut dyn BlockSink, block: &[u8], remaining: u64) -> ExtResult<()> {
    let take = remaining.min(block.len() as u64) as usize;
    sink.consume(&block[..take])
}

/// A mounted (read-only) ext2/ext3/ext4 filesystem.
pub struct ExtFs<D> {
    dev: D,
    geometry: Geometry,
    groups: Vec<GroupDesc>,
}

impl<D: BlockDevice> ExtFs<D> {
    /// Checks the superblock signature without building a navigator.
    pub fn identify(dev: &mut D) -> ExtResult<bool> {
        let head = Self::read_superblock_region(dev)?;
        Ok(sb::peek_signature(&head)? == EXT_SIGNATURE)
    }

    /// Reads the superblock and the BGDT and returns a ready navigator.
    pub fn mount(mut dev: D) -> ExtResult<Self> {
        let head = Self::read_superblock_region(&mut dev)?;
        let geometry = Geometry::parse(&head)?;

        info!(
            target: "ext-fs",
            "mounted: {} blocks of {} bytes, {} inodes, {} block groups, revision {}.{}",
            geometry.total_blocks,
            geometry.block_size,
            geometry.total_inodes,
            geometry.total_block_groups,
            geometry.major_version,
            geometry.minor_version,
        );
        debug!(target: "ext-fs", "features: {:?}", geometry.features);

        let groups = block_grp::load_table(&mut dev, &geometry)?;

        Ok(Self {
            dev,
            geometry,
            groups,
        })
    }

    /// The bootstrap region: enough of the start of the volume to cover the
    /// superblock at byte 1024. When the device hands back a single 1024-byte
    /// block (a keyed store captured at block size 1024), the superblock is
    /// the next block over.
    fn read_superblock_region(dev: &mut D) -> ExtResult<Vec<u8>> {
        let mut head = dev.read_bootstrap()?;
        if head.len() < SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE {
            if head.len() < 1024 {
                return Err(ExtError::ShortSuperblock);
            }
            let mut next = vec![0u8; head.len()];
            dev.read_block(1, &mut next)?;
            head.extend_from_slice(&next);
            if head.len() < SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE {
                return Err(ExtError::ShortSuperblock);
            }
        }
        Ok(head)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The decoded BGDT, one descriptor per block group.
    pub fn groups(&self) -> &[GroupDesc] {
        &self.groups
    }

    /// Reads one filesystem block, bounds-checked against the block count.
    pub(crate) fn read_block(&mut self, block: u64, buf: &mut [u8]) -> ExtResult<()> {
        if block >= self.geometry.total_blocks {
            return Err(ExtError::OutOfBounds {
                block,
                total: self.geometry.total_blocks,
            });
        }
        self.dev.read_block(block, buf)
    }

    /// Like [`Self::read_block`], but treats block 0 as an unallocated hole:
    /// the buffer is zero-filled and no device read is issued. Block pointers
    /// of 0 inside a mapping mean exactly that.
    pub(crate) fn read_block_or_hole(&mut self, block: u64, buf: &mut [u8]) -> ExtResult<()> {
        if block == 0 {
            buf.fill(0);
            return Ok(());
        }
        self.read_block(block, buf)
    }

    /// Fetches and decodes an inode by its 1-based number.
    pub fn read_inode(&mut self, number: InodeNumber) -> ExtResult<Inode> {
        if number.0 == 0 || number.0 > self.geometry.total_inodes {
            return Err(ExtError::InodeOutOfRange { inode: number.0 });
        }

        let group = u64::from(number.0 - 1) / self.geometry.inodes_per_group;
        let index = u64::from(number.0 - 1) % self.geometry.inodes_per_group;
        let desc = self
            .groups
            .get(group as usize)
            .ok_or(ExtError::InodeOutOfRange { inode: number.0 })?;

        let byte_index = index * self.geometry.inode_size;
        let block = desc.inode_table + byte_index / self.geometry.block_size;
        let offset = (byte_index % self.geometry.block_size) as usize;

        let mut buf = vec![0u8; self.geometry.block_size as usize];
        self.read_block(block, &mut buf)?;

        // Zero-extend (or truncate) the on-disk inode to the decoded layout:
        // 128-byte inodes leave the extended fields zero, 256-byte inodes
        // carry bytes past what the decoder looks at.
        let raw_bytes = &buf[offset..offset + self.geometry.inode_size as usize];
        let mut widened = [0u8; RAW_INODE_SIZE];
        let take = raw_bytes.len().min(RAW_INODE_SIZE);
        widened[..take].copy_from_slice(&raw_bytes[..take]);
        let raw: RawInode = pod_read_unaligned(&widened);

        Ok(Inode::decode(number, &raw, &self.geometry))
    }

    /// Builds a fresh listing of a directory inode, in on-disk order.
    ///
    /// On filesystems without the `filetype` feature the entry kind is not on
    /// disk; it is resolved from each target inode's mode instead.
    pub fn list_directory(&mut self, number: InodeNumber) -> ExtResult<Vec<DirEntry>> {
        let inode = self.read_inode(number)?;
        debug!(
            target: "ext-fs",
            "listing inode {number}: {} bytes over {} blocks",
            inode.size,
            inode.block_count,
        );

        let mut collector = DirCollector::new(self.geometry.features.filetype_in_dirent);
        self.walk_mapping(&inode, &mut collector)?;
        let mut entries = collector.into_entries();

        if !self.geometry.features.filetype_in_dirent {
            for entry in &mut entries {
                match self.read_inode(entry.inode) {
                    Ok(target) => entry.kind = target.kind(),
                    Err(e) => {
                        warn!(
                            target: "ext-fs",
                            "cannot classify entry {:?}: {e}",
                            entry.name_display(),
                        );
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Streams a file inode's contents into `out`. Returns the bytes
    /// written, which equal the inode's declared size on success.
    pub fn extract_file<W: Write>(&mut self, number: InodeNumber, out: W) -> ExtResult<u64> {
        let inode = self.read_inode(number)?;
        debug!(
            target: "ext-fs",
            "extracting inode {number}: {} bytes over {} blocks",
            inode.size,
            inode.block_count,
        );

        let mut sink = ExtractSink::new(out);
        self.walk_mapping(&inode, &mut sink)?;
        Ok(sink.bytes_written())
    }

    /// Runs the inode's block mapping into `sink`: the extent tree when the
    /// inode and the filesystem both say so, the classic pointer map
    /// otherwise.
    pub(crate) fn walk_mapping(
        &mut self,
        inode: &Inode,
        sink: &mut dyn BlockSink,
    ) -> ExtResult<()> {
        if inode.uses_extents() && self.geometry.features.extents {
            let node = inode.block;
            let mut remaining = inode.size;
            extent::walk(self, &node, &mut remaining, sink)?;
            if remaining > 0 {
                return Err(ExtError::MappingExhausted {
                    expected: inode.size,
                    walked: inode.size - remaining,
                });
            }
            Ok(())
        } else {
            let ptrs = BlockPointers::parse(&inode.block);
            blkmap::walk(self, &ptrs, inode.size, sink)
        }
    }
}
