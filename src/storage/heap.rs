//! # Heap
//!
//! Fixed-size slot storage for entry payloads that live outside the B-tree
//! (row traits store a 16-byte far pointer inline and spill the bytes here,
//! the same role TOAST plays for oversized attributes in a relational
//! engine).
//!
//! ## Slot Geometry
//!
//! Every slot is exactly 256 bytes; a 4 KiB block holds 16 slots. Free slots
//! form a singly linked list threaded through their own trailing 16 bytes:
//!
//! ```text
//! +---------------------------+----------------+
//! | user bytes (240)          | next free ptr  |   <- only while free
//! +---------------------------+----------------+
//! 0                         240              256
//! ```
//!
//! The [`Heap`] handle owns nothing but the far pointer to the head of that
//! list. Persist it wherever the tree root is persisted and rebuild the
//! handle with [`Heap::from_root`].
//!
//! ## Allocation
//!
//! An empty freelist takes one block from the allocator, threads slots
//! 1..16 into the list, roots the list at slot 1 and hands out slot 0.
//! Freeing pushes the slot back on the head. Slots are recycled most
//! recently freed first.

use crate::config::{BLOCK_SIZE, FAR_PTR_SIZE, HEAP_SLOTS_PER_BLOCK, HEAP_SLOT_SIZE};
use crate::error::{Error, Result};
use crate::storage::{BlockAllocator, FarPtr, FileCache};

/// Offset of the next-free pointer inside a free slot.
const NEXT_PTR_OFFSET: u64 = (HEAP_SLOT_SIZE - FAR_PTR_SIZE) as u64;

#[derive(Debug, Clone, Copy, Default)]
pub struct Heap {
    root: FarPtr,
}

impl Heap {
    /// A heap with an empty freelist.
    pub fn new() -> Self {
        Self {
            root: FarPtr::NULL,
        }
    }

    /// Rebuilds a handle around a persisted freelist root.
    pub fn from_root(root: FarPtr) -> Self {
        Self { root }
    }

    /// Current freelist root, for persistence.
    pub fn root(&self) -> FarPtr {
        self.root
    }

    /// Hands out a free slot, taking a fresh block from the allocator when
    /// the freelist is empty.
    pub fn allocate(&mut self, cache: &mut FileCache, tx: u64) -> Result<FarPtr> {
        if self.root.is_null() {
            let block = BlockAllocator::new(cache).allocate_block(tx)?;

            // Thread slots 1..N into a freelist ending at the old (null)
            // root; slot 0 is the one handed out.
            for slot in 1..HEAP_SLOTS_PER_BLOCK {
                let slot_offset = block.offset + (slot * HEAP_SLOT_SIZE) as u64;
                let next = if slot + 1 < HEAP_SLOTS_PER_BLOCK {
                    FarPtr::new(block.file_id, slot_offset + HEAP_SLOT_SIZE as u64)
                } else {
                    FarPtr::NULL
                };
                cache.write_bytes(
                    block.file_id,
                    slot_offset + NEXT_PTR_OFFSET,
                    &next.to_bytes(),
                )?;
            }

            self.root = FarPtr::new(block.file_id, block.offset + HEAP_SLOT_SIZE as u64);
            return Ok(block);
        }

        let slot = self.root;
        let mut next_bytes = [0u8; FAR_PTR_SIZE];
        cache.read_bytes(slot.file_id, slot.offset + NEXT_PTR_OFFSET, &mut next_bytes)?;
        self.root = FarPtr::from_bytes(&next_bytes);
        Ok(slot)
    }

    /// Returns a slot to the freelist.
    pub fn free(&mut self, cache: &mut FileCache, ptr: FarPtr) -> Result<()> {
        cache.write_bytes(
            ptr.file_id,
            ptr.offset + NEXT_PTR_OFFSET,
            &self.root.to_bytes(),
        )?;
        self.root = ptr;
        Ok(())
    }

    /// Reads the full 256-byte slot.
    pub fn read(cache: &mut FileCache, ptr: FarPtr) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEAP_SLOT_SIZE];
        cache.read_bytes(ptr.file_id, ptr.offset, &mut buf)?;
        Ok(buf)
    }

    /// Writes up to 256 bytes into the slot.
    pub fn write(cache: &mut FileCache, ptr: FarPtr, bytes: &[u8]) -> Result<()> {
        if bytes.len() > HEAP_SLOT_SIZE {
            return Err(Error::invalid_argument(format!(
                "heap payload of {} bytes exceeds slot size {}",
                bytes.len(),
                HEAP_SLOT_SIZE
            )));
        }
        cache.write_bytes(ptr.file_id, ptr.offset, bytes)
    }
}

const _: () = assert!(HEAP_SLOTS_PER_BLOCK * HEAP_SLOT_SIZE == BLOCK_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> (FileCache, u64) {
        let mut cache = FileCache::new(dir);
        let tx = BlockAllocator::new(&mut cache).create_transaction().unwrap();
        (cache, tx)
    }

    #[test]
    fn allocate_write_read() {
        let dir = tempdir().unwrap();
        let (mut cache, tx) = setup(dir.path());
        let mut heap = Heap::new();

        let slot = heap.allocate(&mut cache, tx).unwrap();
        let payload = vec![0xAB; HEAP_SLOT_SIZE];
        Heap::write(&mut cache, slot, &payload).unwrap();

        let back = Heap::read(&mut cache, slot).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn free_and_reuse() {
        let dir = tempdir().unwrap();
        let (mut cache, tx) = setup(dir.path());
        let mut heap = Heap::new();

        let first = heap.allocate(&mut cache, tx).unwrap();
        let second = heap.allocate(&mut cache, tx).unwrap();
        assert_ne!(first, second);

        heap.free(&mut cache, first).unwrap();

        // Most recently freed slot comes back first.
        let third = heap.allocate(&mut cache, tx).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn block_overflow_allocates_new_block() {
        let dir = tempdir().unwrap();
        let (mut cache, tx) = setup(dir.path());
        let mut heap = Heap::new();

        let mut slots = Vec::new();
        for _ in 0..HEAP_SLOTS_PER_BLOCK + 1 {
            slots.push(heap.allocate(&mut cache, tx).unwrap());
        }

        // First 16 slots tile the first block in order.
        for (i, slot) in slots.iter().take(HEAP_SLOTS_PER_BLOCK).enumerate() {
            assert_eq!(slot.file_id, slots[0].file_id);
            assert_eq!(slot.offset, slots[0].offset + (i * HEAP_SLOT_SIZE) as u64);
        }

        // The 17th lands in a second block of the same transaction file.
        let overflow = slots[HEAP_SLOTS_PER_BLOCK];
        assert_eq!(overflow.file_id, slots[0].file_id);
        assert_eq!(overflow.offset, slots[0].offset + BLOCK_SIZE as u64);
    }

    #[test]
    fn root_survives_handle_rebuild() {
        let dir = tempdir().unwrap();
        let (mut cache, tx) = setup(dir.path());
        let mut heap = Heap::new();

        heap.allocate(&mut cache, tx).unwrap();
        let root = heap.root();
        assert!(!root.is_null());

        let mut rebuilt = Heap::from_root(root);
        let next = rebuilt.allocate(&mut cache, tx).unwrap();
        assert_eq!(next, root);
    }

    #[test]
    fn oversized_write_is_rejected() {
        let dir = tempdir().unwrap();
        let (mut cache, tx) = setup(dir.path());
        let mut heap = Heap::new();

        let slot = heap.allocate(&mut cache, tx).unwrap();
        let too_big = vec![0u8; HEAP_SLOT_SIZE + 1];
        assert!(matches!(
            Heap::write(&mut cache, slot, &too_big),
            Err(Error::InvalidArgument(_))
        ));
    }
}
