//! # cowdb - Embedded Copy-On-Write B-Tree Store
//!
//! cowdb is an embedded, single-writer, copy-on-write ordered key–value
//! store over a directory of block-partitioned files. Keys and values are
//! opaque byte sequences of a fixed, per-tree size; ordering comes from
//! pluggable row traits. The interface is cursor-style: seek, next, prev,
//! get, insert, update, upsert, remove.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cowdb::{BlockAllocator, BTree, FarPtr, FileCache, RowTraits};
//!
//! # fn main() -> cowdb::Result<()> {
//! let mut cache = FileCache::new("./repo");
//! let tx = BlockAllocator::new(&mut cache).create_transaction()?;
//!
//! let traits = RowTraits::fixed(8, 24)?;
//! let mut tree = BTree::new(&mut cache, FarPtr::NULL, traits)?;
//!
//! let mut entry = vec![0u8; 32];
//! entry[..5].copy_from_slice(b"hello");
//! entry[8..13].copy_from_slice(b"world");
//! let cursor = tree.upsert(tx, &entry)?;
//!
//! assert_eq!(tree.get_entry(&cursor)?, entry);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Cursor API (BTree, Cursor)        │
//! ├─────────────────────────────────────────┤
//! │   Row Traits (projection, comparison)    │
//! ├──────────────────────┬──────────────────┤
//! │   B-Tree Nodes       │   Heap (256 B    │
//! │   (4 KiB blocks)     │   slot freelist) │
//! ├──────────────────────┴──────────────────┤
//! │  Block Allocator (transaction stamping)  │
//! ├─────────────────────────────────────────┤
//! │  File/Block Cache (LRU, write-through)   │
//! ├─────────────────────────────────────────┤
//! │        file_<N>.bin on local disk        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Transactions And Snapshots
//!
//! A transaction is a monotonically increasing number minted by the
//! allocator. Blocks are stamped with the transaction that wrote them, and a
//! writer only mutates blocks carrying its own stamp; anything older is
//! copied to fresh blocks. Root pointers captured before a mutation
//! therefore keep reading their old version:
//!
//! ```text
//! let old_root = tree.root();       // snapshot
//! tree.upsert(new_tx, &entry)?;     // copies the path it rewrites
//! // old_root still resolves to the pre-mutation contents
//! ```
//!
//! ## Concurrency Model
//!
//! Single-threaded, synchronous, exactly one writer. Nothing in the crate
//! locks: the [`FileCache`] and [`BlockAllocator`] must not be shared across
//! threads without external synchronization. Readers of old snapshots are
//! safe in principle (old blocks are never rewritten) but still need their
//! own cache if they run concurrently.
//!
//! ## Module Overview
//!
//! - [`storage`]: far pointers, the file/block cache, the block allocator,
//!   the slot heap
//! - [`btree`]: nodes, cursors, and the copy-on-write tree
//! - [`rows`]: row traits binding opaque entries to keys, values and order
//! - [`io`]: the byte-iterator seam and big-endian codecs
//! - [`config`]: shared layout and resource constants
//! - `cli`: the interactive REPL harness behind the `cowdb` binary

pub mod btree;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod rows;
pub mod storage;

pub use btree::{BTree, Cursor};
pub use error::{Error, Result};
pub use rows::{RowTraits, RowTraitsBuilder};
pub use storage::{BlockAllocator, FarPtr, FileCache, Heap};
