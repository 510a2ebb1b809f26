//! # Storage Layer
//!
//! Everything below the B-tree: numbered repository files behind an LRU
//! file/block cache, transaction-scoped block allocation, and the slot heap
//! for out-of-band payloads.
//!
//! ## Repository Layout
//!
//! ```text
//! repository_dir/
//! ├── file_0.bin    # allocator metadata (transaction id, roots)
//! ├── file_1.bin    # blocks of one transaction
//! ├── file_2.bin    # blocks of another transaction
//! └── ...
//! ```
//!
//! ## Component Map
//!
//! - [`FarPtr`]: 128-bit `(file_id, offset)` address; (0,0) is null.
//! - [`FileCache`]: byte-addressed access with bounded handle and block
//!   pools, write-through semantics.
//! - [`BlockAllocator`]: transaction IDs plus per-transaction 4 KiB block
//!   allocation (one transaction per data file).
//! - [`Heap`]: 256-byte slot freelist for payloads referenced from entries.
//!
//! ## Ownership
//!
//! There is no shared or global state. The [`FileCache`] is the single
//! owning context; the allocator and heap borrow it per call. Components
//! receive exclusive borrows for the duration of an operation, which is what
//! makes the single-writer contract checkable by the compiler.

mod allocator;
mod far_ptr;
mod file_cache;
mod heap;

pub use allocator::{BlockAllocator, ROOT_HEADER_SIZE};
pub use far_ptr::FarPtr;
pub use file_cache::FileCache;
pub use heap::Heap;

pub use crate::config::FAR_PTR_SIZE;
