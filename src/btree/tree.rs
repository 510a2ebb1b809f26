//! # B-Tree
//!
//! Ordered map over fixed-size entries, addressed by a far pointer to its
//! current root. A fresh tree is the null pointer; the handle owns the root
//! pointer and nothing else, since nodes belong to the files (and therefore
//! the transactions) that wrote them.
//!
//! ## Copy-On-Write
//!
//! Every mutation walks the cursor's path from leaf back to root. At each
//! level the in-node change is applied, then the node is written:
//!
//! - stamped with the current transaction: rewritten in place,
//! - any other stamp: written to a freshly allocated block and the parent's
//!   child pointer redirected.
//!
//! That stamp comparison is the whole copy-on-write mechanism. Blocks of
//! older transactions are never touched, so any root pointer captured before
//! a mutation keeps resolving to its old contents.
//!
//! ```text
//!        tx=7 root                    tx=8 root'
//!          /    \          update         /   \
//!      [A t7]  [B t7]      ─────>     [A t7] [B' t8]
//!                                        ^ shared, not copied
//! ```
//!
//! ## Structural Changes
//!
//! A node over one block splits: the upper half moves to a fresh sibling and
//! the sibling's first key becomes the parent's new separator. A non-root
//! node under half capacity merges with the neighbour one slot to its left
//! (leftmost nodes pair with their right neighbour instead, same code path);
//! an oversized merge re-splits. A root branch reduced to one entry
//! collapses into its child, and a tree emptied by removal resets its root
//! to null.
//!
//! ## Descent Rule
//!
//! Branch descent picks the child at the search position on an exact hit,
//! otherwise the child at `position - 1`, clamped at 0. Seeks rely on this
//! exact rule to land on the correct leaf, so it is pinned by tests.
//!
//! ## Cursor Invalidation
//!
//! Mutations rewrite the path the cursor recorded, so every successful
//! mutation returns a freshly sought cursor and use of the stale one is
//! unspecified.

use crate::btree::cursor::{Cursor, PathEntry};
use crate::btree::node::Node;
use crate::config::{BLOCK_SIZE, NODE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::rows::RowTraits;
use crate::storage::{BlockAllocator, FarPtr, FileCache};

/// Defensive bound on tree depth; a path longer than this means a pointer
/// cycle on disk.
const MAX_DEPTH: usize = 64;

/// What a finished level reports to the level above it.
enum Propagate {
    /// Node rewritten (possibly relocated); the parent slot needs the new
    /// pointer and separator, and a merge when the node went underfull.
    Update {
        ptr: FarPtr,
        first_key: Vec<u8>,
        underfull: bool,
    },
    /// Node split; the parent updates the original slot and gains a sibling
    /// slot after it.
    Split {
        left: FarPtr,
        left_key: Vec<u8>,
        right: FarPtr,
        right_key: Vec<u8>,
    },
    /// Node emptied; the parent drops its slot.
    Remove,
}

#[derive(Debug)]
pub struct BTree<'a> {
    cache: &'a mut FileCache,
    root: FarPtr,
    traits: RowTraits,
}

impl<'a> BTree<'a> {
    /// Opens a tree handle over `root` (null for a fresh tree).
    pub fn new(cache: &'a mut FileCache, root: FarPtr, traits: RowTraits) -> Result<Self> {
        let entry_size = traits.entry_size() as usize;
        if traits.key_size() > u16::MAX as u32 || traits.value_size() > u16::MAX as u32 {
            return Err(Error::invalid_argument(
                "key and value sizes must fit a node header",
            ));
        }
        if (BLOCK_SIZE - NODE_HEADER_SIZE) / entry_size < 2 {
            return Err(Error::invalid_argument(format!(
                "entry size {} leaves fewer than two entries per node",
                entry_size
            )));
        }
        Ok(Self {
            cache,
            root,
            traits,
        })
    }

    /// Current root pointer. Capture it before mutating to keep a readable
    /// snapshot of the old version.
    pub fn root(&self) -> FarPtr {
        self.root
    }

    pub fn traits(&self) -> &RowTraits {
        &self.traits
    }

    fn key_size(&self) -> usize {
        self.traits.key_size() as usize
    }

    fn read_node(&mut self, ptr: FarPtr) -> Result<Node> {
        let mut it = self.cache.iter_at(ptr);
        let node = Node::read_from(&mut it)?;

        let key_size = self.traits.key_size() as u16;
        let value_size = self.traits.value_size() as u16;
        if node.key_size() != key_size {
            return Err(Error::corruption(format!(
                "node at {} has key size {}, row traits say {}",
                ptr,
                node.key_size(),
                key_size
            )));
        }
        if node.is_leaf() && node.value_size() != value_size {
            return Err(Error::corruption(format!(
                "leaf at {} has value size {}, row traits say {}",
                ptr,
                node.value_size(),
                value_size
            )));
        }
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Seeks and navigation
    // ------------------------------------------------------------------

    /// First position whose key is `>= key`; the leaf's `found` flag
    /// reflects an exact match.
    pub fn seek_begin(&mut self, key: &[u8]) -> Result<Cursor> {
        if key.len() != self.key_size() {
            return Err(Error::invalid_argument(format!(
                "key of {} bytes in a tree with key size {}",
                key.len(),
                self.key_size()
            )));
        }

        if self.root.is_null() {
            return Ok(Cursor::end());
        }

        let mut cursor = Cursor::default();
        let mut current = self.root;
        loop {
            if cursor.depth() >= MAX_DEPTH {
                return Err(Error::corruption("tree deeper than the depth bound"));
            }

            let node = self.read_node(current)?;
            let count = node.entry_count();
            let find = node.find_key(key, &self.traits);

            if node.is_leaf() {
                cursor.push(PathEntry {
                    node: current,
                    position: find.position,
                    count,
                    found: find.found,
                });
                return Ok(cursor);
            }

            if count == 0 {
                return Err(Error::corruption("empty branch node on the search path"));
            }

            // The descent rule: take the matched child on a hit, otherwise
            // the child before the insertion point, clamped at 0.
            let child_position = if find.found {
                find.position
            } else {
                find.position.saturating_sub(1)
            };
            let child_position = child_position.min(count - 1);

            cursor.push(PathEntry {
                node: current,
                position: child_position,
                count,
                found: find.found,
            });
            current = node.child_at(child_position)?;
        }
    }

    /// First position whose key is strictly `> key`.
    pub fn seek_end(&mut self, key: &[u8]) -> Result<Cursor> {
        let cursor = self.seek_begin(key)?;
        if cursor.is_found() {
            self.next(&cursor)
        } else {
            Ok(cursor)
        }
    }

    /// Cursor at the smallest key, or the end cursor on an empty tree.
    pub fn begin(&mut self) -> Result<Cursor> {
        if self.root.is_null() {
            return Ok(Cursor::end());
        }
        let mut cursor = Cursor::default();
        self.descend_leftmost(&mut cursor, self.root)?;
        Ok(cursor)
    }

    /// The end sentinel: equal to any cursor whose every level is past its
    /// last entry.
    pub fn end(&self) -> Cursor {
        Cursor::end()
    }

    /// Cursor at the largest key, or the end cursor on an empty tree.
    pub fn last(&mut self) -> Result<Cursor> {
        if self.root.is_null() {
            return Ok(Cursor::end());
        }
        let mut cursor = Cursor::default();
        self.descend_rightmost(&mut cursor, self.root)?;
        Ok(cursor)
    }

    fn descend_leftmost(&mut self, cursor: &mut Cursor, from: FarPtr) -> Result<()> {
        let mut current = from;
        loop {
            if cursor.depth() >= MAX_DEPTH {
                return Err(Error::corruption("tree deeper than the depth bound"));
            }
            let node = self.read_node(current)?;
            let count = node.entry_count();
            if node.is_leaf() {
                cursor.push(PathEntry {
                    node: current,
                    position: 0,
                    count,
                    found: count > 0,
                });
                return Ok(());
            }
            if count == 0 {
                return Err(Error::corruption("empty branch node on the search path"));
            }
            cursor.push(PathEntry {
                node: current,
                position: 0,
                count,
                found: false,
            });
            current = node.child_at(0)?;
        }
    }

    fn descend_rightmost(&mut self, cursor: &mut Cursor, from: FarPtr) -> Result<()> {
        let mut current = from;
        loop {
            if cursor.depth() >= MAX_DEPTH {
                return Err(Error::corruption("tree deeper than the depth bound"));
            }
            let node = self.read_node(current)?;
            let count = node.entry_count();
            if node.is_leaf() {
                cursor.push(PathEntry {
                    node: current,
                    position: count.saturating_sub(1),
                    count,
                    found: count > 0,
                });
                return Ok(());
            }
            if count == 0 {
                return Err(Error::corruption("empty branch node on the search path"));
            }
            cursor.push(PathEntry {
                node: current,
                position: count - 1,
                count,
                found: false,
            });
            current = node.child_at(count - 1)?;
        }
    }

    /// Steps to the next entry in key order. `PastEnd` on an ended cursor;
    /// the end cursor when the last entry is left behind.
    pub fn next(&mut self, cursor: &Cursor) -> Result<Cursor> {
        if cursor.is_ended() {
            return Err(Error::PastEnd);
        }

        let mut next = cursor.clone();
        let depth = next.path.len();

        let leaf = &mut next.path[depth - 1];
        if leaf.position + 1 < leaf.count {
            leaf.position += 1;
            leaf.found = true;
            return Ok(next);
        }

        // The leaf is exhausted (or the cursor sat in its trailing gap):
        // climb to the deepest ancestor with a right sibling and descend to
        // the leftmost leaf of the next subtree.
        for level in (0..depth.saturating_sub(1)).rev() {
            if next.path[level].position + 1 < next.path[level].count {
                next.path.truncate(level + 1);
                let entry = &mut next.path[level];
                entry.position += 1;
                entry.found = false;
                let branch = self.read_node(entry.node)?;
                let child = branch.child_at(entry.position)?;
                self.descend_leftmost(&mut next, child)?;
                return Ok(next);
            }
        }

        Ok(Cursor::end())
    }

    /// Steps to the previous entry in key order. From the end cursor this
    /// lands on the last entry; from `begin()` it returns the end cursor
    /// (the documented choice for that boundary).
    pub fn prev(&mut self, cursor: &Cursor) -> Result<Cursor> {
        if cursor.is_ended() {
            return self.last();
        }

        let mut prev = cursor.clone();
        let depth = prev.path.len();

        let leaf = &mut prev.path[depth - 1];
        if leaf.position > 0 && leaf.count > 0 {
            leaf.position = leaf.position.min(leaf.count) - 1;
            leaf.found = true;
            return Ok(prev);
        }

        for level in (0..depth.saturating_sub(1)).rev() {
            if prev.path[level].position > 0 {
                prev.path.truncate(level + 1);
                let entry = &mut prev.path[level];
                entry.position -= 1;
                entry.found = false;
                let branch = self.read_node(entry.node)?;
                let child = branch.child_at(entry.position)?;
                self.descend_rightmost(&mut prev, child)?;
                return Ok(prev);
            }
        }

        Ok(Cursor::end())
    }

    /// Full entry bytes at the cursor's leaf position, projected through the
    /// entry traits.
    pub fn get_entry(&mut self, cursor: &Cursor) -> Result<Vec<u8>> {
        if cursor.is_ended() {
            return Err(Error::PastEnd);
        }
        let leaf = *cursor.leaf().ok_or(Error::PastEnd)?;
        if leaf.position >= leaf.count {
            return Err(Error::KeyNotFound);
        }
        let node = self.read_node(leaf.node)?;
        let entry = node.entry_at(leaf.position);
        Ok(self.traits.entry_traits().project(entry))
    }

    /// The key at the cursor's leaf position.
    pub fn get_key(&mut self, cursor: &Cursor) -> Result<Vec<u8>> {
        let entry = self.get_entry(cursor)?;
        Ok(self.traits.project_key(&entry))
    }

    /// Number of entries, by full iteration.
    pub fn count(&mut self) -> Result<u64> {
        let mut total = 0u64;
        let mut cursor = self.begin()?;
        while !cursor.is_ended() {
            total += 1;
            cursor = self.next(&cursor)?;
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Inserts a new entry at a cursor positioned by `seek_begin` on the
    /// entry's key. Fails with `DuplicateKey` when the leaf reports a match.
    pub fn insert(&mut self, tx: u64, cursor: &Cursor, entry: &[u8]) -> Result<Cursor> {
        self.check_entry(entry)?;
        if cursor.is_found() {
            return Err(Error::DuplicateKey);
        }
        let key = self.traits.project_key(entry);

        if self.root.is_null() {
            let mut leaf = Node::new_leaf(
                tx,
                self.traits.key_size() as u16,
                self.traits.value_size() as u16,
            );
            leaf.insert_entry(0, entry)?;
            self.root = self.write_cow(tx, FarPtr::NULL, &mut leaf)?;
            return self.seek_begin(&key);
        }

        let leaf_entry = *cursor.leaf().ok_or(Error::PastEnd)?;
        let mut leaf = self.read_node(leaf_entry.node)?;
        leaf.insert_entry(leaf_entry.position, entry)?;

        self.propagate(tx, &cursor.path, leaf)?;
        self.seek_begin(&key)
    }

    /// Replaces the entry at a found cursor. The new entry must carry the
    /// same key as the slot it overwrites.
    pub fn update(&mut self, tx: u64, cursor: &Cursor, entry: &[u8]) -> Result<Cursor> {
        self.check_entry(entry)?;
        if cursor.is_ended() {
            return Err(Error::PastEnd);
        }
        if !cursor.is_found() {
            return Err(Error::KeyNotFound);
        }

        let key = self.traits.project_key(entry);
        let leaf_entry = *cursor.leaf().ok_or(Error::PastEnd)?;
        let mut leaf = self.read_node(leaf_entry.node)?;

        let existing = leaf.key_at(leaf_entry.position, &self.traits);
        if self.traits.compare_keys(&existing, &key) != std::cmp::Ordering::Equal {
            return Err(Error::invalid_argument(
                "update entry carries a different key than the cursor slot",
            ));
        }

        leaf.update_entry(leaf_entry.position, entry)?;
        self.propagate(tx, &cursor.path, leaf)?;
        self.seek_begin(&key)
    }

    /// Removes the entry at a found cursor. Returns a cursor sought at the
    /// removed key (its successor position, not found).
    pub fn remove(&mut self, tx: u64, cursor: &Cursor) -> Result<Cursor> {
        if cursor.is_ended() {
            return Err(Error::PastEnd);
        }
        if !cursor.is_found() {
            return Err(Error::KeyNotFound);
        }

        let leaf_entry = *cursor.leaf().ok_or(Error::PastEnd)?;
        let mut leaf = self.read_node(leaf_entry.node)?;
        let key = leaf.key_at(leaf_entry.position, &self.traits);

        leaf.remove_entry(leaf_entry.position)?;
        self.propagate(tx, &cursor.path, leaf)?;
        self.seek_begin(&key)
    }

    /// Seek, then insert or update.
    pub fn upsert(&mut self, tx: u64, entry: &[u8]) -> Result<Cursor> {
        self.check_entry(entry)?;
        let key = self.traits.project_key(entry);
        let cursor = self.seek_begin(&key)?;
        if cursor.is_found() {
            self.update(tx, &cursor, entry)
        } else {
            self.insert(tx, &cursor, entry)
        }
    }

    fn check_entry(&self, entry: &[u8]) -> Result<()> {
        if entry.len() != self.traits.entry_size() as usize {
            return Err(Error::invalid_argument(format!(
                "entry of {} bytes in a tree with entry size {}",
                entry.len(),
                self.traits.entry_size()
            )));
        }
        Ok(())
    }

    /// Writes a node honouring the copy-on-write rule: in place when the
    /// stamp matches `tx`, into a fresh block otherwise.
    fn write_cow(&mut self, tx: u64, at: FarPtr, node: &mut Node) -> Result<FarPtr> {
        let target = if !at.is_null() && node.transaction_id() == tx {
            at
        } else {
            node.set_transaction_id(tx);
            BlockAllocator::new(self.cache).allocate_block(tx)?
        };

        let mut it = self.cache.iter_at(target);
        node.write_to(&mut it)?;
        Ok(target)
    }

    /// Runs the leaf-to-root rewrite, updating the root pointer at the top.
    fn propagate(&mut self, tx: u64, path: &[PathEntry], leaf: Node) -> Result<()> {
        let mut level = path.len() - 1;
        let mut change = self.resolve_node(tx, path[level].node, leaf, level == 0)?;

        while level > 0 {
            level -= 1;
            change = self.apply_to_parent(tx, path[level], change, level == 0)?;
        }

        match change {
            Propagate::Update { ptr, .. } => self.root = ptr,
            Propagate::Split {
                left,
                left_key,
                right,
                right_key,
            } => {
                let mut root = Node::new_branch(tx, self.traits.key_size() as u16);
                root.insert_branch_entry(0, &left_key, left)?;
                root.insert_branch_entry(1, &right_key, right)?;
                self.root = self.write_cow(tx, FarPtr::NULL, &mut root)?;
            }
            Propagate::Remove => self.root = FarPtr::NULL,
        }

        // A branch root carrying a single entry is only allowed transiently
        // during a collapsing remove; fold it into its child.
        let mut guard = 0;
        while !self.root.is_null() {
            let root_node = self.read_node(self.root)?;
            if root_node.is_leaf() || root_node.entry_count() != 1 {
                break;
            }
            self.root = root_node.child_at(0)?;
            guard += 1;
            if guard > MAX_DEPTH {
                return Err(Error::corruption("root collapse did not terminate"));
            }
        }

        Ok(())
    }

    /// Finishes one level: split an oversized node, report an emptied one,
    /// otherwise write it out and report where it went.
    fn resolve_node(&mut self, tx: u64, at: FarPtr, mut node: Node, is_root: bool) -> Result<Propagate> {
        if node.entry_count() == 0 {
            // The block is simply orphaned; old snapshots may still read it.
            return Ok(Propagate::Remove);
        }

        if node.should_split() {
            let mut sibling = if node.is_leaf() {
                Node::new_leaf(tx, node.key_size(), node.value_size())
            } else {
                Node::new_branch(tx, node.key_size())
            };
            node.split(&mut sibling)?;

            let left_key = node.first_key(&self.traits);
            let right_key = sibling.first_key(&self.traits);
            let right = self.write_cow(tx, FarPtr::NULL, &mut sibling)?;
            let left = self.write_cow(tx, at, &mut node)?;
            return Ok(Propagate::Split {
                left,
                left_key,
                right,
                right_key,
            });
        }

        let underfull = !is_root && node.should_merge();
        let first_key = node.first_key(&self.traits);
        let ptr = self.write_cow(tx, at, &mut node)?;
        Ok(Propagate::Update {
            ptr,
            first_key,
            underfull,
        })
    }

    /// Applies a child's change to its parent and resolves the parent.
    fn apply_to_parent(
        &mut self,
        tx: u64,
        parent_entry: PathEntry,
        change: Propagate,
        is_root: bool,
    ) -> Result<Propagate> {
        let mut parent = self.read_node(parent_entry.node)?;
        let position = parent_entry.position;

        match change {
            Propagate::Update {
                ptr,
                first_key,
                underfull,
            } => {
                parent.update_branch_entry(position, &first_key, ptr)?;
                if underfull {
                    self.merge_children(tx, &mut parent, position)?;
                }
            }
            Propagate::Split {
                left,
                left_key,
                right,
                right_key,
            } => {
                parent.update_branch_entry(position, &left_key, left)?;
                parent.insert_branch_entry(position + 1, &right_key, right)?;
            }
            Propagate::Remove => {
                parent.remove_entry(position)?;
            }
        }

        self.resolve_node(tx, parent_entry.node, parent, is_root)
    }

    /// Merges the underfull child at `position` with a neighbour: the pair
    /// is `(position-1, position)`, or `(0, 1)` when the underfull child is
    /// leftmost. The right partner folds into the left; an oversized result
    /// re-splits, otherwise the right slot disappears.
    fn merge_children(&mut self, tx: u64, parent: &mut Node, position: u16) -> Result<()> {
        if parent.entry_count() < 2 {
            // No sibling to merge with; the shortfall resolves higher up.
            return Ok(());
        }

        let (left_pos, right_pos) = if position > 0 {
            (position - 1, position)
        } else {
            (0, 1)
        };

        let left_at = parent.child_at(left_pos)?;
        let right_at = parent.child_at(right_pos)?;
        let mut left = self.read_node(left_at)?;
        let mut right = self.read_node(right_at)?;

        left.merge(&mut right)?;

        if left.should_split() {
            left.split(&mut right)?;
            let left_key = left.first_key(&self.traits);
            let right_key = right.first_key(&self.traits);
            let new_right = self.write_cow(tx, right_at, &mut right)?;
            let new_left = self.write_cow(tx, left_at, &mut left)?;
            parent.update_branch_entry(left_pos, &left_key, new_left)?;
            parent.update_branch_entry(right_pos, &right_key, new_right)?;
        } else {
            let left_key = left.first_key(&self.traits);
            let new_left = self.write_cow(tx, left_at, &mut left)?;
            parent.update_branch_entry(left_pos, &left_key, new_left)?;
            parent.remove_entry(right_pos)?;
        }

        Ok(())
    }
}
