//! # B-Tree Node
//!
//! In-memory image of one on-disk node. A node is a single buffer, never
//! larger than a block, with a fixed 16-byte header followed by a packed
//! array of fixed-size entries:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------------
//! 0       8     transaction_id (the copy-on-write stamp)
//! 8       2     flags (bit 0 = leaf)
//! 10      2     entry_count
//! 12      2     key_size
//! 14      2     value_size
//! 16      n*(key_size+value_size)   packed entries
//! ```
//!
//! All header fields big-endian. Leaf entries are raw user entries; branch
//! entries are a separator key followed by a 16-byte far pointer to the
//! child, so a branch always has `value_size == 16`.
//!
//! Entries are kept sorted strictly ascending under the tree's key
//! comparator. The buffer length is always exactly
//! `header + entry_count × entry_size`; setting the entry count resizes the
//! buffer to match.
//!
//! ## Split And Merge Thresholds
//!
//! A node wants splitting as soon as its serialized size exceeds one block,
//! and wants merging when its entry count drops below half of
//! `capacity() = (block - header) / entry_size`. Splitting moves the upper
//! half `[count/2, count)` into the sibling; merging appends the sibling's
//! entries and zeroes the sibling.
//!
//! ## Validation
//!
//! A node read off disk whose header cannot be reconciled with its own size
//! fields (zero key size, leaf without values, branch values that are not
//! far pointers, buffer over one block) is reported as `Corruption` and is
//! fatal to the enclosing operation.

use zerocopy::big_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{BLOCK_SIZE, FAR_PTR_SIZE, NODE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::io::{read_exact, write_all, ByteIter, SpanIter};
use crate::rows::RowTraits;
use crate::storage::FarPtr;

const FLAG_LEAF: u16 = 0x1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeHeader {
    transaction_id: U64,
    flags: U16,
    entry_count: U16,
    key_size: U16,
    value_size: U16,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

/// Result of a key search inside one node: the insertion index of the key
/// in sorted order, and whether the entry at that index is an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindResult {
    pub position: u16,
    pub found: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    data: Vec<u8>,
}

impl Node {
    pub fn new_leaf(transaction_id: u64, key_size: u16, value_size: u16) -> Self {
        Self::new(transaction_id, FLAG_LEAF, key_size, value_size)
    }

    pub fn new_branch(transaction_id: u64, key_size: u16) -> Self {
        Self::new(transaction_id, 0, key_size, FAR_PTR_SIZE as u16)
    }

    fn new(transaction_id: u64, flags: u16, key_size: u16, value_size: u16) -> Self {
        let mut node = Self {
            data: vec![0u8; NODE_HEADER_SIZE],
        };
        let header = node.header_mut();
        header.transaction_id = U64::new(transaction_id);
        header.flags = U16::new(flags);
        header.key_size = U16::new(key_size);
        header.value_size = U16::new(value_size);
        node
    }

    /// Reads a node: header first, then exactly the entry bytes the header
    /// promises. Anything irreconcilable is `Corruption`.
    pub fn read_from<I: ByteIter>(it: &mut I) -> Result<Self> {
        let mut data = vec![0u8; NODE_HEADER_SIZE];
        read_exact(it, &mut data)?;

        let mut node = Self { data };
        node.validate_header()?;

        let size = NODE_HEADER_SIZE + node.entry_count() as usize * node.entry_size();
        if size > BLOCK_SIZE {
            return Err(Error::corruption(format!(
                "node of {} entries × {} bytes exceeds block size",
                node.entry_count(),
                node.entry_size()
            )));
        }

        node.data.resize(size, 0);
        read_exact(it, &mut node.data[NODE_HEADER_SIZE..])?;
        Ok(node)
    }

    pub fn write_to<I: ByteIter>(&self, it: &mut I) -> Result<()> {
        write_all(it, &self.data)
    }

    fn validate_header(&self) -> Result<()> {
        if self.key_size() == 0 {
            return Err(Error::corruption("node key size is zero"));
        }
        if self.is_leaf() && self.value_size() == 0 {
            return Err(Error::corruption("leaf node value size is zero"));
        }
        if !self.is_leaf() && self.value_size() as usize != FAR_PTR_SIZE {
            return Err(Error::corruption(format!(
                "branch node value size {} is not a far pointer",
                self.value_size()
            )));
        }
        Ok(())
    }

    fn header(&self) -> &NodeHeader {
        NodeHeader::ref_from_bytes(&self.data[..NODE_HEADER_SIZE])
            .expect("node buffer holds header") // INVARIANT: constructors never shrink below the header
    }

    fn header_mut(&mut self) -> &mut NodeHeader {
        NodeHeader::mut_from_bytes(&mut self.data[..NODE_HEADER_SIZE])
            .expect("node buffer holds header") // INVARIANT: constructors never shrink below the header
    }

    pub fn transaction_id(&self) -> u64 {
        self.header().transaction_id.get()
    }

    pub fn set_transaction_id(&mut self, transaction_id: u64) {
        self.header_mut().transaction_id = U64::new(transaction_id);
    }

    pub fn is_leaf(&self) -> bool {
        self.header().flags.get() & FLAG_LEAF != 0
    }

    pub fn entry_count(&self) -> u16 {
        self.header().entry_count.get()
    }

    pub fn key_size(&self) -> u16 {
        self.header().key_size.get()
    }

    pub fn value_size(&self) -> u16 {
        self.header().value_size.get()
    }

    pub fn entry_size(&self) -> usize {
        self.key_size() as usize + self.value_size() as usize
    }

    pub fn buffer_size(&self) -> usize {
        self.data.len()
    }

    /// Updates the count and resizes the buffer to exactly fit it.
    pub fn set_entry_count(&mut self, count: u16) {
        let size = NODE_HEADER_SIZE + count as usize * self.entry_size();
        self.header_mut().entry_count = U16::new(count);
        self.data.resize(size, 0);
    }

    fn entry_offset(&self, position: u16) -> usize {
        NODE_HEADER_SIZE + position as usize * self.entry_size()
    }

    pub fn entry_at(&self, position: u16) -> &[u8] {
        let offset = self.entry_offset(position);
        &self.data[offset..offset + self.entry_size()]
    }

    /// The comparison key of the entry at `position`: projected through the
    /// row traits in a leaf, the leading separator bytes in a branch.
    pub fn key_at(&self, position: u16, traits: &RowTraits) -> Vec<u8> {
        let entry = self.entry_at(position);
        if self.is_leaf() {
            traits.project_key(entry)
        } else {
            entry[..self.key_size() as usize].to_vec()
        }
    }

    pub fn first_key(&self, traits: &RowTraits) -> Vec<u8> {
        self.key_at(0, traits)
    }

    /// The child pointer stored in a branch entry.
    pub fn child_at(&self, position: u16) -> Result<FarPtr> {
        if self.is_leaf() {
            return Err(Error::corruption("leaf node has no child pointers"));
        }
        let entry = self.entry_at(position);
        let mut value = entry[self.key_size() as usize..].to_vec();
        let mut it = SpanIter::new(&mut value);
        FarPtr::read_from(&mut it)
    }

    /// Insertion index of `key` under the tree's comparator, and whether the
    /// key is already present.
    pub fn find_key(&self, key: &[u8], traits: &RowTraits) -> FindResult {
        debug_assert_eq!(key.len(), self.key_size() as usize);

        let count = self.entry_count();
        for position in 0..count {
            let existing = self.key_at(position, traits);
            match traits.compare_keys(&existing, key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => {
                    return FindResult {
                        position,
                        found: true,
                    }
                }
                std::cmp::Ordering::Greater => {
                    return FindResult {
                        position,
                        found: false,
                    }
                }
            }
        }
        FindResult {
            position: count,
            found: false,
        }
    }

    /// Inserts `entry` at `position`, shifting later entries right.
    pub fn insert_entry(&mut self, position: u16, entry: &[u8]) -> Result<()> {
        self.check_entry_size(entry)?;
        let count = self.entry_count();
        if position > count {
            return Err(Error::invalid_argument(format!(
                "insert position {} past entry count {}",
                position, count
            )));
        }

        let entry_size = self.entry_size();
        let offset = self.entry_offset(position);
        let old_len = self.data.len();

        self.set_entry_count(count + 1);
        self.data.copy_within(offset..old_len, offset + entry_size);
        self.data[offset..offset + entry_size].copy_from_slice(entry);
        Ok(())
    }

    /// Overwrites the entry at `position` in place.
    pub fn update_entry(&mut self, position: u16, entry: &[u8]) -> Result<()> {
        self.check_entry_size(entry)?;
        if position >= self.entry_count() {
            return Err(Error::invalid_argument(format!(
                "update position {} past entry count {}",
                position,
                self.entry_count()
            )));
        }

        let offset = self.entry_offset(position);
        let entry_size = self.entry_size();
        self.data[offset..offset + entry_size].copy_from_slice(entry);
        Ok(())
    }

    /// Removes the entry at `position`, shifting later entries left.
    pub fn remove_entry(&mut self, position: u16) -> Result<()> {
        let count = self.entry_count();
        if position >= count {
            return Err(Error::invalid_argument(format!(
                "remove position {} past entry count {}",
                position, count
            )));
        }

        let entry_size = self.entry_size();
        let offset = self.entry_offset(position);
        let end = self.data.len();
        self.data.copy_within(offset + entry_size..end, offset);
        self.set_entry_count(count - 1);
        Ok(())
    }

    fn branch_entry(&self, key: &[u8], child: FarPtr) -> Result<Vec<u8>> {
        if key.len() != self.key_size() as usize {
            return Err(Error::invalid_argument(format!(
                "separator of {} bytes in a node with key size {}",
                key.len(),
                self.key_size()
            )));
        }
        let mut entry = Vec::with_capacity(self.entry_size());
        entry.extend_from_slice(key);
        entry.extend_from_slice(&child.to_bytes());
        Ok(entry)
    }

    /// Inserts a `(separator, child)` pair into a branch.
    pub fn insert_branch_entry(&mut self, position: u16, key: &[u8], child: FarPtr) -> Result<()> {
        let entry = self.branch_entry(key, child)?;
        self.insert_entry(position, &entry)
    }

    /// Rewrites a branch slot: both the separator and the child pointer.
    pub fn update_branch_entry(&mut self, position: u16, key: &[u8], child: FarPtr) -> Result<()> {
        let entry = self.branch_entry(key, child)?;
        self.update_entry(position, &entry)
    }

    /// Moves the upper half `[count/2, count)` into `other`, which must be
    /// an empty node of the same shape.
    pub fn split(&mut self, other: &mut Node) -> Result<()> {
        if other.entry_count() != 0 || other.entry_size() != self.entry_size() {
            return Err(Error::invalid_argument(
                "split target must be an empty node of the same shape",
            ));
        }

        let count = self.entry_count();
        let mid = count / 2;
        let moved = count - mid;

        other.set_entry_count(moved);
        let src = self.entry_offset(mid);
        other.data[NODE_HEADER_SIZE..].copy_from_slice(&self.data[src..]);
        self.set_entry_count(mid);
        Ok(())
    }

    /// Appends every entry of `other` and zeroes `other`'s count.
    pub fn merge(&mut self, other: &mut Node) -> Result<()> {
        if other.entry_size() != self.entry_size() || other.is_leaf() != self.is_leaf() {
            return Err(Error::invalid_argument(
                "merge partners must share a shape",
            ));
        }

        let count = self.entry_count();
        let incoming = other.entry_count();
        let dest = self.entry_offset(count);

        self.set_entry_count(count + incoming);
        self.data[dest..].copy_from_slice(&other.data[NODE_HEADER_SIZE..]);
        other.set_entry_count(0);
        Ok(())
    }

    /// Entries a block-sized buffer of this shape can hold.
    pub fn capacity(&self) -> u16 {
        ((BLOCK_SIZE - NODE_HEADER_SIZE) / self.entry_size()) as u16
    }

    pub fn should_split(&self) -> bool {
        self.data.len() > BLOCK_SIZE
    }

    pub fn should_merge(&self) -> bool {
        self.entry_count() < self.capacity() / 2
    }

    fn check_entry_size(&self, entry: &[u8]) -> Result<()> {
        if entry.len() != self.entry_size() {
            return Err(Error::invalid_argument(format!(
                "entry of {} bytes in a node with entry size {}",
                entry.len(),
                self.entry_size()
            )));
        }
        Ok(())
    }
}
