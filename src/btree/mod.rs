//! # Copy-On-Write B-Tree
//!
//! The transactional ordered map at the center of the crate. Nodes live in
//! 4 KiB blocks behind the file cache; every node carries the transaction
//! stamp of its writer, and mutation rewrites exactly the root-to-leaf path
//! it walked: in place when a node already belongs to the running
//! transaction, into freshly allocated blocks otherwise.
//!
//! ## Module Map
//!
//! - [`node`]: one on-disk node: header accessors, entry array edits,
//!   split/merge primitives.
//! - [`cursor`]: the root-to-leaf path type and its end-sentinel semantics.
//! - [`tree`]: search, navigation and the CoW mutation walk.
//!
//! ## Reading A Snapshot
//!
//! Any root pointer captured before a mutation still resolves: blocks of
//! older transactions are never rewritten (their stamp differs, so writers
//! copy instead). Opening a [`BTree`] at an old root reads the tree exactly
//! as it was.

mod cursor;
mod node;
mod tree;

pub use cursor::{Cursor, PathEntry};
pub use node::{FindResult, Node};
pub use tree::BTree;
