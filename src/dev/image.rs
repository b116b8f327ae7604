//! Byte-addressable image backend.

use std::io::{Read, Seek, SeekFrom};

use log::trace;

use crate::dev::BlockDevice;
use crate::errors::ExtResult;

/// Reads filesystem blocks from an opened image file or raw block device.
///
/// Works over anything seekable, which keeps tests on in-memory cursors and
/// the CLI on [`std::fs::File`].
pub struct ImageSource<R> {
    inner: R,
}

impl<R: Read + Seek> ImageSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> BlockDevice for ImageSource<R> {
    fn read_block(&mut self, block_no: u64, buf: &mut [u8]) -> ExtResult<()> {
        let offset = block_no * buf.len() as u64;
        trace!(target: "ext-dev", "read block {block_no} at byte offset {offset}");
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::errors::ExtError;

    #[test]
    fn reads_block_at_byte_offset() {
        let mut image = vec![0u8; 4096];
        image[2048..3072].fill(0xAB);
        let mut dev = ImageSource::new(Cursor::new(image));

        let mut buf = [0u8; 1024];
        dev.read_block(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));

        dev.read_block(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn short_read_is_an_error() {
        let mut dev = ImageSource::new(Cursor::new(vec![0u8; 1500]));
        let mut buf = [0u8; 1024];
        match dev.read_block(1, &mut buf) {
            Err(ExtError::Io(_)) => {}
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn works_over_a_real_file() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0x5Au8; 8192]).unwrap();
        let mut dev = ImageSource::new(file);

        let mut buf = [0u8; 4096];
        dev.read_block(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));
    }
}
