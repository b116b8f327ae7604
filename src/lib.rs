//! Read-only browser for the ext2/ext3/ext4 on-disk filesystem family.
//!
//! The crate decodes a filesystem from any [`dev::BlockDevice`] -- a flat
//! image or raw block device ([`dev::ImageSource`]), or a keyed store mapping
//! filesystem block numbers to captured payloads ([`dev::IndirectSource`]).
//! [`fs::ext::ExtFs`] mounts the superblock and block-group descriptor table
//! once, then serves directory listings starting from the root inode and
//! streams file contents into any [`std::io::Write`] sink.
//!
//! Strictly read-only: nothing is mounted in the OS sense, no journal is
//! replayed, no checksum is verified, and writes are out of the question.

pub mod dev;
pub mod errors;
pub mod fs;
