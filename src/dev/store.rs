//! Keyed indirect-store backend.
//!
//! Some captures keep filesystem blocks in a content-addressed store instead
//! of a flat image: a map table translates a filesystem block number into a
//! row id, and a data table holds the payload under that id. [`BlockMap`]
//! models those two lookups; connection and credential management stay with
//! the implementer.

use std::io;

use log::trace;

use crate::dev::BlockDevice;
use crate::errors::ExtResult;

/// Two-step lookup into a keyed block store.
pub trait BlockMap {
    /// Translates a filesystem block number into a storage id. A missing row
    /// is an error.
    fn lookup(&mut self, block_no: u64) -> io::Result<u64>;

    /// Fetches the payload stored under `id`. A missing row is an error.
    fn fetch(&mut self, id: u64) -> io::Result<Vec<u8>>;
}

/// Adapts a [`BlockMap`] into a [`BlockDevice`].
pub struct IndirectSource<M> {
    map: M,
}

impl<M: BlockMap> IndirectSource<M> {
    pub fn new(map: M) -> Self {
        Self { map }
    }

    pub fn into_inner(self) -> M {
        self.map
    }

    fn fetch_block(&mut self, block_no: u64) -> ExtResult<Vec<u8>> {
        let id = self.map.lookup(block_no)?;
        trace!(target: "ext-dev", "block {block_no} maps to stored row {id}");
        Ok(self.map.fetch(id)?)
    }
}

impl<M: BlockMap> BlockDevice for IndirectSource<M> {
    fn read_block(&mut self, block_no: u64, buf: &mut [u8]) -> ExtResult<()> {
        let payload = self.fetch_block(block_no)?;
        if payload.len() != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "block {block_no}: stored payload is {} bytes, expected {}",
                    payload.len(),
                    buf.len()
                ),
            )
            .into());
        }
        buf.copy_from_slice(&payload);
        Ok(())
    }

    /// Stored blocks already carry their capture-time size, so the bootstrap
    /// is simply stored block 0.
    fn read_bootstrap(&mut self) -> ExtResult<Vec<u8>> {
        self.fetch_block(0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::ExtError;

    /// In-memory stand-in for the map/data table pair.
    struct MemStore {
        map: HashMap<u64, u64>,
        data: HashMap<u64, Vec<u8>>,
    }

    impl BlockMap for MemStore {
        fn lookup(&mut self, block_no: u64) -> io::Result<u64> {
            self.map
                .get(&block_no)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no map row"))
        }

        fn fetch(&mut self, id: u64) -> io::Result<Vec<u8>> {
            self.data
                .get(&id)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no data row"))
        }
    }

    #[test]
    fn resolves_through_the_map_table() {
        let mut store = MemStore {
            map: HashMap::from([(7, 1007)]),
            data: HashMap::from([(1007, vec![0xCD; 1024])]),
        };
        store.map.insert(0, 1000);
        store.data.insert(1000, vec![0u8; 1024]);

        let mut dev = IndirectSource::new(store);
        let mut buf = [0u8; 1024];
        dev.read_block(7, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xCD));
    }

    #[test]
    fn missing_row_is_an_error() {
        let mut dev = IndirectSource::new(MemStore {
            map: HashMap::new(),
            data: HashMap::new(),
        });
        let mut buf = [0u8; 1024];
        match dev.read_block(3, &mut buf) {
            Err(ExtError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let mut dev = IndirectSource::new(MemStore {
            map: HashMap::from([(2, 5)]),
            data: HashMap::from([(5, vec![0u8; 512])]),
        });
        let mut buf = [0u8; 1024];
        assert!(matches!(
            dev.read_block(2, &mut buf),
            Err(ExtError::Io(e)) if e.kind() == io::ErrorKind::InvalidData
        ));
    }
}
