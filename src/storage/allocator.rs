//! # Block Allocator
//!
//! Mints monotonically increasing transaction IDs and hands out fresh 4 KiB
//! block locations, partitioned so that every data file belongs to exactly
//! one transaction.
//!
//! ## File 0 Header
//!
//! Allocator state persists in the first block of file 0:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       8     transaction_id (most recently minted)
//! 8       16    schema root far pointer (reserved for callers)
//! 24      8     last_transaction_file (file currently written)
//! ```
//!
//! All fields big-endian. The remainder of the block is zero.
//!
//! ## Per-Transaction Files
//!
//! `allocate_block(tx)` appends to `last_transaction_file` only while that
//! file is stamped with `tx` (its first 8 bytes) and is under the 10 MiB
//! rollover limit; otherwise it advances to the next file id and starts at
//! offset 0. Every allocated block is zero-filled with its first 8 bytes set
//! to `tx`, which gives two invariants the B-tree's copy-on-write rule
//! depends on:
//!
//! 1. A block's first 8 bytes always name the transaction that wrote it.
//! 2. All blocks in one data file carry the same stamp.
//!
//! `last_transaction_file` is persisted only *after* the new block has been
//! written, so a failed allocation leaves the previous state addressable.
//!
//! ## Transactions
//!
//! A transaction is nothing but its number: no buffering, no undo state. The
//! number is the copy-on-write discriminator: a node stamped with the
//! current transaction may be rewritten in place, any other stamp forces a
//! fresh block.

use tracing::debug;
use zerocopy::big_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{BLOCK_SIZE, DATA_FILE_SIZE_LIMIT};
use crate::error::{Error, Result};
use crate::storage::{FarPtr, FileCache};

pub const ROOT_HEADER_SIZE: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RootHeader {
    transaction_id: U64,
    schema_root_file: U64,
    schema_root_offset: U64,
    last_transaction_file: U64,
}

const _: () = assert!(std::mem::size_of::<RootHeader>() == ROOT_HEADER_SIZE);

/// Allocator over a borrowed [`FileCache`]. Cheap to construct; borrow it
/// for the duration of one call group.
#[derive(Debug)]
pub struct BlockAllocator<'a> {
    cache: &'a mut FileCache,
}

impl<'a> BlockAllocator<'a> {
    pub fn new(cache: &'a mut FileCache) -> Self {
        Self { cache }
    }

    /// Most recently minted transaction ID. Initializes file 0 with a zeroed
    /// root block when the repository is fresh.
    pub fn current_transaction_id(&mut self) -> Result<u64> {
        self.ensure_initialized()?;
        Ok(self.read_header()?.transaction_id.get())
    }

    /// Mints the next transaction ID and persists it.
    pub fn create_transaction(&mut self) -> Result<u64> {
        self.ensure_initialized()?;
        let mut header = self.read_header()?;
        let tx = header.transaction_id.get() + 1;
        header.transaction_id = U64::new(tx);
        self.write_header(&header)?;
        debug!(transaction_id = tx, "minted transaction");
        Ok(tx)
    }

    /// Appends a zeroed block stamped with `tx` and returns its address.
    pub fn allocate_block(&mut self, tx: u64) -> Result<FarPtr> {
        self.ensure_initialized()?;
        let mut header = self.read_header()?;

        let mut file_id = header.last_transaction_file.get();
        let stamp = if file_id == 0 {
            0
        } else {
            self.read_file_stamp(file_id)?
        };

        let mut offset = 0u64;
        if file_id == 0 || stamp != tx {
            file_id += 1;
            debug!(file_id, transaction_id = tx, "starting new transaction file");
        } else {
            offset = self.cache.get_file_size(file_id)?;
            if offset >= DATA_FILE_SIZE_LIMIT {
                file_id += 1;
                offset = 0;
                debug!(file_id, transaction_id = tx, "rolling over full data file");
            }
        }

        let mut block = vec![0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&tx.to_be_bytes());
        self.cache.write_bytes(file_id, offset, &block)?;

        // Persisted only after the block write so a failure leaves the
        // previous allocator state addressable.
        if file_id != header.last_transaction_file.get() {
            header.last_transaction_file = U64::new(file_id);
            self.write_header(&header)?;
        }

        Ok(FarPtr::new(file_id, offset))
    }

    /// The reserved root pointer in the file-0 header. Callers layer their
    /// own meaning on it (the table façade stores its schema root here; the
    /// REPL persists its tree root).
    pub fn schema_root(&mut self) -> Result<FarPtr> {
        self.ensure_initialized()?;
        let header = self.read_header()?;
        Ok(FarPtr::new(
            header.schema_root_file.get(),
            header.schema_root_offset.get(),
        ))
    }

    pub fn set_schema_root(&mut self, ptr: FarPtr) -> Result<()> {
        self.ensure_initialized()?;
        let mut header = self.read_header()?;
        header.schema_root_file = U64::new(ptr.file_id);
        header.schema_root_offset = U64::new(ptr.offset);
        self.write_header(&header)
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if self.cache.get_file_size(0)? < BLOCK_SIZE as u64 {
            let zeros = vec![0u8; BLOCK_SIZE];
            self.cache.write_bytes(0, 0, &zeros)?;
        }
        Ok(())
    }

    fn read_header(&mut self) -> Result<RootHeader> {
        let mut buf = [0u8; ROOT_HEADER_SIZE];
        self.cache.read_bytes(0, 0, &mut buf)?;
        RootHeader::read_from_bytes(&buf)
            .map_err(|_| Error::corruption("allocator root header unreadable"))
    }

    fn write_header(&mut self, header: &RootHeader) -> Result<()> {
        self.cache.write_bytes(0, 0, header.as_bytes())
    }

    fn read_file_stamp(&mut self, file_id: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.cache.read_bytes(file_id, 0, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}
