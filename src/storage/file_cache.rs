//! # File/Block Cache
//!
//! Byte-addressed random access over numbered repository files, with two
//! LRU-bounded pools in front of the filesystem:
//!
//! - **File handles**: at most [`MAX_OPEN_FILES`] streams are open at once.
//!   Handles open lazily; a write to a nonexistent file creates it, and the
//!   repository directory itself is created on first use.
//! - **Blocks**: at most [`BLOCK_CACHE_CAPACITY`] buffers of [`BLOCK_SIZE`]
//!   bytes, keyed by `(file_id, block_base)`. A cache miss reads the whole
//!   block; subsequent byte reads hit the buffer.
//!
//! ## Repository Layout
//!
//! A repository is a directory; file `N` lives at `file_<N>.bin`. File 0 is
//! reserved for allocator metadata, higher files hold blocks belonging to a
//! single transaction (see `storage::allocator`).
//!
//! ## Write-Through
//!
//! Writes update the cached buffer *and* the underlying file before
//! returning. There is no dirty tracking and no flush step; evicting a block
//! simply drops the buffer. A bulk write covering an aligned whole block
//! replaces the buffer wholesale without a read; any other write pulls the
//! block in first so the cached bytes stay exact.
//!
//! ## Missing Data Reads As Zero
//!
//! Reading from an absent file, or past the end of a file, yields zero
//! bytes. This matches the null-pointer convention used everywhere else: an
//! uninitialized root is indistinguishable from an explicit null.
//!
//! ## Eviction
//!
//! Both pools use last-use ticks; eviction scans for the minimum tick. The
//! scan is O(pool size) but only runs when a pool is full.
//!
//! ## Thread Safety
//!
//! `FileCache` is single-threaded state. Sharing one across threads without
//! external synchronization is undefined; wrap it in your own lock if you
//! must.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::config::{BLOCK_CACHE_CAPACITY, BLOCK_SIZE, MAX_OPEN_FILES};
use crate::error::Result;
use crate::io::FileIter;
use crate::storage::FarPtr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    file_id: u64,
    base: u64,
}

#[derive(Debug)]
struct BlockEntry {
    data: Box<[u8; BLOCK_SIZE]>,
    tick: u64,
}

#[derive(Debug)]
struct FileHandle {
    file: File,
    tick: u64,
}

#[derive(Debug)]
pub struct FileCache {
    base_path: PathBuf,
    handles: HashMap<u64, FileHandle>,
    blocks: HashMap<BlockKey, BlockEntry>,
    max_open_files: usize,
    block_capacity: usize,
    next_tick: u64,
    dir_created: bool,
}

fn block_base(offset: u64) -> u64 {
    offset - (offset % BLOCK_SIZE as u64)
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_limits(path, MAX_OPEN_FILES, BLOCK_CACHE_CAPACITY)
    }

    /// Builds a cache with custom pool bounds. Bounds below 1 are clamped.
    pub fn with_limits<P: AsRef<Path>>(
        path: P,
        max_open_files: usize,
        block_capacity: usize,
    ) -> Self {
        Self {
            base_path: path.as_ref().to_path_buf(),
            handles: HashMap::new(),
            blocks: HashMap::new(),
            max_open_files: max_open_files.max(1),
            block_capacity: block_capacity.max(1),
            next_tick: 0,
            dir_created: false,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file_path(&self, file_id: u64) -> PathBuf {
        self.base_path.join(format!("file_{}.bin", file_id))
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Size of a file in bytes; 0 when the file does not exist.
    pub fn get_file_size(&mut self, file_id: u64) -> Result<u64> {
        match fs::metadata(self.file_path(file_id)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads one byte. Absent files and bytes past end-of-file read as 0.
    pub fn read(&mut self, file_id: u64, offset: u64) -> Result<u8> {
        let base = block_base(offset);
        let entry = self.block_entry(file_id, base)?;
        Ok(entry.data[(offset - base) as usize])
    }

    /// Writes one byte through the cache to the file, creating it on demand.
    pub fn write(&mut self, file_id: u64, offset: u64, byte: u8) -> Result<()> {
        let base = block_base(offset);
        let entry = self.block_entry(file_id, base)?;
        entry.data[(offset - base) as usize] = byte;

        let file = self.handle_for_write(file_id)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&[byte])?;
        Ok(())
    }

    /// Bulk read into `buf`. Served block-by-block out of the cache; bytes
    /// past end-of-file come back as 0.
    pub fn read_bytes(&mut self, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos < buf.len() {
            let abs = offset + pos as u64;
            let base = block_base(abs);
            let in_block = (abs - base) as usize;
            let len = (BLOCK_SIZE - in_block).min(buf.len() - pos);

            let entry = self.block_entry(file_id, base)?;
            buf[pos..pos + len].copy_from_slice(&entry.data[in_block..in_block + len]);
            pos += len;
        }
        Ok(())
    }

    /// Bulk write-through. An aligned whole-block span replaces the cached
    /// buffer without reading the file first; partial spans pull the block
    /// in and patch it so cache and file stay byte-identical.
    pub fn write_bytes(&mut self, file_id: u64, offset: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos < data.len() {
            let abs = offset + pos as u64;
            let base = block_base(abs);
            let in_block = (abs - base) as usize;
            let len = (BLOCK_SIZE - in_block).min(data.len() - pos);

            if in_block == 0 && len == BLOCK_SIZE {
                let mut buf = Box::new([0u8; BLOCK_SIZE]);
                buf.copy_from_slice(&data[pos..pos + len]);
                self.insert_block(BlockKey { file_id, base }, buf);
            } else {
                let entry = self.block_entry(file_id, base)?;
                entry.data[in_block..in_block + len].copy_from_slice(&data[pos..pos + len]);
            }
            pos += len;
        }

        let file = self.handle_for_write(file_id)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    pub fn iter(&mut self, file_id: u64, offset: u64) -> FileIter<'_> {
        FileIter::new(self, file_id, offset)
    }

    pub fn iter_at(&mut self, ptr: FarPtr) -> FileIter<'_> {
        FileIter::new(self, ptr.file_id, ptr.offset)
    }

    pub fn open_file_count(&self) -> usize {
        self.handles.len()
    }

    pub fn cached_block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_entry(&mut self, file_id: u64, base: u64) -> Result<&mut BlockEntry> {
        let key = BlockKey { file_id, base };
        if !self.blocks.contains_key(&key) {
            let data = self.read_block_from_file(file_id, base)?;
            self.insert_block(key, data);
        }

        let tick = self.bump_tick();
        let entry = self
            .blocks
            .get_mut(&key)
            .expect("block resident after load"); // INVARIANT: insert_block never evicts the key it inserted
        entry.tick = tick;
        Ok(entry)
    }

    fn read_block_from_file(&mut self, file_id: u64, base: u64) -> Result<Box<[u8; BLOCK_SIZE]>> {
        let mut data = Box::new([0u8; BLOCK_SIZE]);

        if let Some(file) = self.handle_for_read(file_id)? {
            file.seek(SeekFrom::Start(base))?;
            let mut filled = 0usize;
            while filled < BLOCK_SIZE {
                let n = file.read(&mut data[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }

        Ok(data)
    }

    fn insert_block(&mut self, key: BlockKey, data: Box<[u8; BLOCK_SIZE]>) {
        let tick = self.bump_tick();
        self.blocks.insert(key, BlockEntry { data, tick });

        while self.blocks.len() > self.block_capacity {
            let victim = self
                .blocks
                .iter()
                .min_by_key(|(_, e)| e.tick)
                .map(|(k, _)| *k);
            match victim {
                Some(k) if k != key => {
                    trace!(file_id = k.file_id, base = k.base, "evicting cached block");
                    self.blocks.remove(&k);
                }
                _ => break,
            }
        }
    }

    fn handle_for_read(&mut self, file_id: u64) -> Result<Option<&mut File>> {
        if self.handles.contains_key(&file_id) {
            return Ok(Some(self.touch_handle(file_id)));
        }

        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.file_path(file_id))
        {
            Ok(file) => {
                debug!(file_id, "opened repository file");
                self.insert_handle(file_id, file);
                Ok(Some(self.touch_handle(file_id)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_for_write(&mut self, file_id: u64) -> Result<&mut File> {
        if self.handles.contains_key(&file_id) {
            return Ok(self.touch_handle(file_id));
        }

        if !self.dir_created {
            fs::create_dir_all(&self.base_path)?;
            self.dir_created = true;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.file_path(file_id))?;
        debug!(file_id, "opened repository file for writing");
        self.insert_handle(file_id, file);
        Ok(self.touch_handle(file_id))
    }

    fn touch_handle(&mut self, file_id: u64) -> &mut File {
        let tick = self.bump_tick();
        let handle = self
            .handles
            .get_mut(&file_id)
            .expect("handle resident after open"); // INVARIANT: callers insert before touching
        handle.tick = tick;
        &mut handle.file
    }

    fn insert_handle(&mut self, file_id: u64, file: File) {
        let tick = self.bump_tick();
        self.handles.insert(file_id, FileHandle { file, tick });

        while self.handles.len() > self.max_open_files {
            let victim = self
                .handles
                .iter()
                .min_by_key(|(_, h)| h.tick)
                .map(|(id, _)| *id);
            match victim {
                Some(id) if id != file_id => {
                    debug!(file_id = id, "evicting least recently used file handle");
                    self.handles.remove(&id);
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_from_missing_file_returns_zero() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        assert_eq!(cache.read(99, 0).unwrap(), 0);
        assert_eq!(cache.read(99, 123_456).unwrap(), 0);
        assert_eq!(cache.get_file_size(99).unwrap(), 0);
    }

    #[test]
    fn write_creates_file_and_directory() {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("nested").join("repo");
        let mut cache = FileCache::new(&repo);

        cache.write(1, 10, 0xAB).unwrap();

        assert!(repo.join("file_1.bin").exists());
        assert_eq!(cache.get_file_size(1).unwrap(), 11);
        assert_eq!(cache.read(1, 10).unwrap(), 0xAB);
    }

    #[test]
    fn bulk_roundtrip_crossing_block_boundary() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        let data: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        let offset = BLOCK_SIZE as u64 - 100;
        cache.write_bytes(2, offset, &data).unwrap();

        let mut back = vec![0u8; data.len()];
        cache.read_bytes(2, offset, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn aligned_full_block_write_visible_to_fresh_cache() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        let block = vec![0x5Au8; BLOCK_SIZE];
        cache.write_bytes(3, BLOCK_SIZE as u64, &block).unwrap();
        drop(cache);

        let mut fresh = FileCache::new(dir.path());
        assert_eq!(fresh.read(3, BLOCK_SIZE as u64).unwrap(), 0x5A);
        assert_eq!(
            fresh.read(3, 2 * BLOCK_SIZE as u64 - 1).unwrap(),
            0x5A
        );
        assert_eq!(fresh.get_file_size(3).unwrap(), 2 * BLOCK_SIZE as u64);
    }

    #[test]
    fn single_byte_writes_are_write_through() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        cache.write(1, 5, 0x11).unwrap();

        // A second cache over the same directory sees the byte on disk.
        let mut other = FileCache::new(dir.path());
        assert_eq!(other.read(1, 5).unwrap(), 0x11);
    }

    #[test]
    fn file_handle_pool_is_bounded() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        for file_id in 1..=9 {
            cache.write(file_id, 0, file_id as u8).unwrap();
        }

        assert!(cache.open_file_count() <= MAX_OPEN_FILES);

        // Evicted files reopen transparently.
        for file_id in 1..=9 {
            assert_eq!(cache.read(file_id, 0).unwrap(), file_id as u8);
        }
    }

    #[test]
    fn block_cache_is_bounded_and_lru() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::with_limits(dir.path(), MAX_OPEN_FILES, 2);

        cache.write(1, 0, 1).unwrap();
        cache.write(1, BLOCK_SIZE as u64, 2).unwrap();
        // Touch block 0 so block 1 is the LRU victim.
        cache.read(1, 0).unwrap();
        cache.write(1, 2 * BLOCK_SIZE as u64, 3).unwrap();

        assert!(cache.cached_block_count() <= 2);

        // Evicted block rereads correctly from disk.
        assert_eq!(cache.read(1, BLOCK_SIZE as u64).unwrap(), 2);
    }

    #[test]
    fn reads_past_end_of_file_are_zero() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());

        cache.write(1, 0, 0xFF).unwrap();
        assert_eq!(cache.read(1, 1).unwrap(), 0);
        assert_eq!(cache.read(1, BLOCK_SIZE as u64 + 7).unwrap(), 0);
    }
}
