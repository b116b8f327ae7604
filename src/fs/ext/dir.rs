//! Directory entry parsing.
//!
//! Directory data blocks hold a chain of variable-length entries: inode
//! number, entry size, name length, an optional type byte, then the name.
//! With the `filetype` feature the name length is one byte and a type byte
//! follows; without it the name length is 16 bits and the type must be
//! resolved from the target inode.

use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{ExtError, ExtResult};
use crate::fs::ext::inode::InodeNumber;
use crate::fs::{BlockSink, EntryKind};

/// One row of a directory listing.
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// Position in the listing, used for selection.
    pub id: u32,

    pub inode: InodeNumber,

    /// On-disk size of the whole entry, padding included.
    pub entry_size: u16,

    pub kind: EntryKind,

    /// Name bytes, copied out of the block buffer. Not guaranteed to be
    /// UTF-8.
    pub name: Vec<u8>,
}

impl DirEntry {
    /// The name for display purposes; invalid UTF-8 is replaced.
    pub fn name_display(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Collects [`DirEntry`] rows from the data blocks of a directory inode.
///
/// Fed one block at a time through [`BlockSink`]. The listing is rebuilt
/// from scratch for every directory read; entries with inode 0 are unused
/// slots and are skipped.
pub(crate) struct DirCollector {
    filetype_in_dirent: bool,
    entries: Vec<DirEntry>,
}

impl DirCollector {
    pub(crate) fn new(filetype_in_dirent: bool) -> Self {
        Self {
            filetype_in_dirent,
            entries: Vec::new(),
        }
    }

    pub(crate) fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    fn parse_block(&mut self, data: &[u8]) -> ExtResult<()> {
        let mut cursor = 0usize;

        while cursor < data.len() {
            if cursor + 8 > data.len() {
                return Err(ExtError::DirEntryMalformed { offset: cursor });
            }

            let inode = LittleEndian::read_u32(&data[cursor..cursor + 4]);
            let entry_size = LittleEndian::read_u16(&data[cursor + 4..cursor + 6]);
            let (name_len, kind) = if self.filetype_in_dirent {
                (
                    usize::from(data[cursor + 6]),
                    EntryKind::from_dirent_code(data[cursor + 7]),
                )
            } else {
                (
                    usize::from(LittleEndian::read_u16(&data[cursor + 6..cursor + 8])),
                    EntryKind::Unknown,
                )
            };

            if entry_size == 0
                || cursor + usize::from(entry_size) > data.len()
                || cursor + 8 + name_len > data.len()
            {
                return Err(ExtError::DirEntryMalformed { offset: cursor });
            }

            if inode != 0 {
                self.entries.push(DirEntry {
                    id: self.entries.len() as u32,
                    inode: InodeNumber(inode),
                    entry_size,
                    kind,
                    // copy: the block buffer is reused by the next read
                    name: data[cursor + 8..cursor + 8 + name_len].to_vec(),
                });
            }

            cursor += usize::from(entry_size);
        }

        Ok(())
    }
}

impl BlockSink for DirCollector {
    fn consume(&mut self, data: &[u8]) -> ExtResult<()> {
        self.parse_block(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(inode: u32, entry_size: u16, kind: u8, name: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; usize::from(entry_size)];
        LittleEndian::write_u32(&mut raw[0..4], inode);
        LittleEndian::write_u16(&mut raw[4..6], entry_size);
        raw[6] = name.len() as u8;
        raw[7] = kind;
        raw[8..8 + name.len()].copy_from_slice(name);
        raw
    }

    #[test]
    fn parses_typed_entries() {
        let mut block = entry(2, 12, 2, b".");
        block.extend(entry(2, 1012, 2, b".."));
        assert_eq!(block.len(), 1024);

        let mut collector = DirCollector::new(true);
        collector.consume(&block).unwrap();
        let entries = collector.into_entries();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[0].inode, InodeNumber(2));
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[1].entry_size, 1012);
        assert_eq!(entries[1].name, b"..");
    }

    #[test]
    fn untyped_entries_use_a_16_bit_name_length() {
        let mut block = vec![0u8; 64];
        LittleEndian::write_u32(&mut block[0..4], 11);
        LittleEndian::write_u16(&mut block[4..6], 64);
        LittleEndian::write_u16(&mut block[6..8], 5);
        block[8..13].copy_from_slice(b"hello");

        let mut collector = DirCollector::new(false);
        collector.consume(&block).unwrap();
        let entries = collector.into_entries();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Unknown);
        assert_eq!(entries[0].name, b"hello");
    }

    #[test]
    fn high_bit_names_survive_byte_identical() {
        let name = [0x66, 0xC3, 0xA9, 0xFF, 0x00, 0x7F];
        let block = entry(5, 32, 1, &name);

        let mut collector = DirCollector::new(true);
        collector.consume(&block).unwrap();
        assert_eq!(collector.into_entries()[0].name, name);
    }

    #[test]
    fn unused_slots_are_skipped() {
        let mut block = entry(0, 16, 0, b"gone");
        block.extend(entry(7, 16, 1, b"kept"));

        let mut collector = DirCollector::new(true);
        collector.consume(&block).unwrap();
        let entries = collector.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, b"kept");
        assert_eq!(entries[0].id, 0);
    }

    #[test]
    fn zero_sized_entries_are_malformed() {
        let mut block = vec![0u8; 32];
        LittleEndian::write_u32(&mut block[0..4], 3);
        // entry_size left at 0
        match DirCollector::new(true).consume(&block) {
            Err(ExtError::DirEntryMalformed { offset }) => assert_eq!(offset, 0),
            other => panic!("expected DirEntryMalformed, got {other:?}"),
        }
    }

    #[test]
    fn entries_running_past_the_block_are_malformed() {
        let block = entry(3, 24, 1, b"x");
        // truncate the block under the declared entry size
        match DirCollector::new(true).consume(&block[..16]) {
            Err(ExtError::DirEntryMalformed { offset }) => assert_eq!(offset, 0),
            other => panic!("expected DirEntryMalformed, got {other:?}"),
        }
    }
}
