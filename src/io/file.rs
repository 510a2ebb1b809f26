//! Byte cursor over a file region, served by the block cache.

use crate::error::Result;
use crate::io::ByteIter;
use crate::storage::FileCache;

/// Cursor over `(file_id, offset)` that reads and writes through a
/// [`FileCache`]. Borrowing the cache exclusively for the iterator's
/// lifetime keeps block-cache bookkeeping single-threaded by construction.
///
/// Reads past end-of-file return zero bytes; `has_next` is the end-of-data
/// signal, mirroring the cache's "absent reads as empty" convention.
#[derive(Debug)]
pub struct FileIter<'a> {
    cache: &'a mut FileCache,
    file_id: u64,
    offset: u64,
}

impl<'a> FileIter<'a> {
    pub fn new(cache: &'a mut FileCache, file_id: u64, offset: u64) -> Self {
        Self {
            cache,
            file_id,
            offset,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bulk read from the current position.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.cache.read_bytes(self.file_id, self.offset, buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Bulk write at the current position.
    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.cache.write_bytes(self.file_id, self.offset, buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }
}

impl ByteIter for FileIter<'_> {
    fn read(&mut self) -> Result<u8> {
        let byte = self.cache.read(self.file_id, self.offset)?;
        self.offset += 1;
        Ok(byte)
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        self.cache.write(self.file_id, self.offset, byte)?;
        self.offset += 1;
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        match self.cache.get_file_size(self.file_id) {
            Ok(size) => self.offset < size,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{read_u32, write_u32};
    use tempfile::tempdir;

    #[test]
    fn write_then_read_through_iterator() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        let mut it = FileIter::new(&mut cache, 3, 0);
        write_u32(&mut it, 0xCAFE_F00D).unwrap();

        let mut it = FileIter::new(&mut cache, 3, 0);
        assert_eq!(read_u32(&mut it).unwrap(), 0xCAFE_F00D);
    }

    #[test]
    fn has_next_false_for_missing_file() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        let mut it = FileIter::new(&mut cache, 42, 0);
        assert!(!it.has_next());
    }

    #[test]
    fn has_next_tracks_file_size() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        cache.write(1, 0, 0xAA).unwrap();

        let mut it = FileIter::new(&mut cache, 1, 0);
        assert!(it.has_next());
        it.read().unwrap();
        assert!(!it.has_next());
    }

    #[test]
    fn bulk_roundtrip_advances_offset() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        let mut it = FileIter::new(&mut cache, 1, 8);
        it.write_bytes(b"abcdef").unwrap();
        assert_eq!(it.offset(), 14);

        let mut back = [0u8; 6];
        let mut it = FileIter::new(&mut cache, 1, 8);
        it.read_bytes(&mut back).unwrap();
        assert_eq!(&back, b"abcdef");
    }
}
