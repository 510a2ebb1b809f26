//! # Configuration Constants
//!
//! Centralizes the layout and resource constants the storage and B-tree
//! layers share. Constants that depend on each other are co-located and
//! cross-checked with compile-time assertions so a change to one cannot
//! silently break another.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (16 bytes, fixed)
//!       │     A node's serialized form never exceeds BLOCK_SIZE; the
//!       │     split threshold in btree::node derives from these two.
//!       │
//!       ├─> HEAP_SLOTS_PER_BLOCK (derived: BLOCK_SIZE / HEAP_SLOT_SIZE)
//!       │
//!       └─> BLOCK_CACHE_CAPACITY (4096 blocks ≈ 16 MiB resident)
//!
//! DATA_FILE_SIZE_LIMIT (10 MiB)
//!       │
//!       └─> Must be a multiple of BLOCK_SIZE so a full file holds only
//!           whole blocks.
//!
//! HEAP_SLOT_SIZE (256 bytes)
//!       │
//!       └─> Must leave room for a trailing far pointer (16 bytes) that
//!           threads the freelist through free slots.
//! ```

// ============================================================================
// BLOCK LAYOUT
// ============================================================================

/// Size of one storage block in bytes. Blocks are the unit of allocation,
/// of cache residency, and the maximum serialized size of a B-tree node.
pub const BLOCK_SIZE: usize = 4096;

/// Size of the B-tree node header in bytes.
pub const NODE_HEADER_SIZE: usize = 16;

/// Size of a far pointer on the wire: two big-endian u64s.
pub const FAR_PTR_SIZE: usize = 16;

const _: () = assert!(
    NODE_HEADER_SIZE < BLOCK_SIZE,
    "node header must leave room for entries"
);

// ============================================================================
// FILE CACHE BOUNDS
// ============================================================================

/// Maximum number of simultaneously open file handles.
pub const MAX_OPEN_FILES: usize = 4;

/// Maximum number of resident cached blocks (4096 × 4 KiB ≈ 16 MiB).
pub const BLOCK_CACHE_CAPACITY: usize = 4096;

// ============================================================================
// ALLOCATOR
// ============================================================================

/// A data file is retired once it reaches this size; the allocator then
/// advances to a fresh file.
pub const DATA_FILE_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

const _: () = assert!(
    DATA_FILE_SIZE_LIMIT % BLOCK_SIZE as u64 == 0,
    "data files must hold a whole number of blocks"
);

// ============================================================================
// HEAP GEOMETRY
// ============================================================================

/// Size of one heap slot in bytes.
pub const HEAP_SLOT_SIZE: usize = 256;

/// Number of heap slots carved out of one block.
pub const HEAP_SLOTS_PER_BLOCK: usize = BLOCK_SIZE / HEAP_SLOT_SIZE;

const _: () = assert!(
    BLOCK_SIZE % HEAP_SLOT_SIZE == 0,
    "heap slots must tile a block exactly"
);

const _: () = assert!(
    HEAP_SLOT_SIZE >= FAR_PTR_SIZE,
    "a free heap slot must be able to hold the next-free far pointer"
);
