//! # Row Traits
//!
//! Binds the opaque fixed-size entries a tree stores to a logical shape:
//! which bytes form the key, which form the value, and how two keys order.
//! The B-tree itself consults only the key comparator and the three fixed
//! sizes; projection runs when entries are handed back to the caller.
//!
//! ## Closed Field Set
//!
//! Columns are a sum type over a small closed set instead of trait objects;
//! the comparator is called in the innermost search loop and a match on four
//! variants beats a vtable there:
//!
//! - `Span`: fixed-length raw bytes, lexicographic order
//! - `U32` / `I32`: big-endian 32-bit integers, numeric order
//! - `HeapRef`: a 16-byte far pointer to a 256-byte heap slot; orders by its
//!   raw pointer bytes (heap fields are payload carriers, not useful keys)
//!
//! ## Composites
//!
//! A [`CompositeTraits`] projects an ordered subset of fields out of a raw
//! entry: the key projection is the concatenation of the key-referenced
//! fields' bytes, the value projection the concatenation of the rest, both
//! in entry order. Comparison of two equal-shaped projections walks the
//! fields left to right.
//!
//! ## Example
//!
//! ```no_run
//! use cowdb::rows::RowTraitsBuilder;
//!
//! let mut builder = RowTraitsBuilder::new();
//! let _name = builder.add_span_field(16);
//! let id = builder.add_u32_field();
//! builder.add_key_reference(id).unwrap();
//! let traits = builder.build().unwrap();
//!
//! assert_eq!(traits.key_size(), 4);   // the u32 id
//! assert_eq!(traits.value_size(), 16); // the name span
//! ```
//!
//! Large payloads go through the heap: store a `HeapRef` field inline and
//! use [`FieldTraits::fetch`] to materialize the referenced slot.

use std::cmp::Ordering;

use crate::config::FAR_PTR_SIZE;
use crate::error::{Error, Result};
use crate::storage::{FarPtr, FileCache, Heap};

/// One fixed-size column inside an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTraits {
    Span { offset: u32, size: u32 },
    U32 { offset: u32 },
    I32 { offset: u32 },
    HeapRef { offset: u32 },
}

impl FieldTraits {
    pub fn offset(&self) -> u32 {
        match *self {
            FieldTraits::Span { offset, .. }
            | FieldTraits::U32 { offset }
            | FieldTraits::I32 { offset }
            | FieldTraits::HeapRef { offset } => offset,
        }
    }

    /// Stored (and projected) length of the field in bytes.
    pub fn size(&self) -> u32 {
        match *self {
            FieldTraits::Span { size, .. } => size,
            FieldTraits::U32 { .. } | FieldTraits::I32 { .. } => 4,
            FieldTraits::HeapRef { .. } => FAR_PTR_SIZE as u32,
        }
    }

    /// Orders two field-sized byte slices.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.size() as usize);
        debug_assert_eq!(b.len(), self.size() as usize);

        match *self {
            FieldTraits::Span { .. } | FieldTraits::HeapRef { .. } => a.cmp(b),
            FieldTraits::U32 { .. } => {
                let ua = u32::from_be_bytes([a[0], a[1], a[2], a[3]]);
                let ub = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                ua.cmp(&ub)
            }
            FieldTraits::I32 { .. } => {
                let ia = i32::from_be_bytes([a[0], a[1], a[2], a[3]]);
                let ib = i32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                ia.cmp(&ib)
            }
        }
    }

    /// The field's inline bytes within a raw entry.
    pub fn project<'e>(&self, entry: &'e [u8]) -> &'e [u8] {
        let start = self.offset() as usize;
        &entry[start..start + self.size() as usize]
    }

    /// Materializes the field: inline bytes for plain fields, the referenced
    /// 256-byte heap slot for `HeapRef`.
    pub fn fetch(&self, cache: &mut FileCache, entry: &[u8]) -> Result<Vec<u8>> {
        match self {
            FieldTraits::HeapRef { .. } => {
                let raw: [u8; FAR_PTR_SIZE] = self
                    .project(entry)
                    .try_into()
                    .map_err(|_| Error::invalid_argument("entry too short for heap field"))?;
                Heap::read(cache, FarPtr::from_bytes(&raw))
            }
            _ => Ok(self.project(entry).to_vec()),
        }
    }
}

/// An ordered subset of an entry's fields, projected into contiguous bytes.
#[derive(Debug, Clone)]
pub struct CompositeTraits {
    fields: Vec<FieldTraits>,
}

impl CompositeTraits {
    pub fn new(fields: Vec<FieldTraits>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldTraits] {
        &self.fields
    }

    /// Projected length: the sum of the field sizes.
    pub fn size(&self) -> u32 {
        self.fields.iter().map(|f| f.size()).sum()
    }

    /// Concatenates the fields' bytes out of a raw entry.
    pub fn project(&self, entry: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        for field in &self.fields {
            out.extend_from_slice(field.project(entry));
        }
        out
    }

    /// Orders two projections of this shape, field by field.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.size() as usize);
        debug_assert_eq!(b.len(), self.size() as usize);

        let mut offset = 0usize;
        for field in &self.fields {
            let size = field.size() as usize;
            let ordering = field.compare(&a[offset..offset + size], &b[offset..offset + size]);
            if ordering != Ordering::Equal {
                return ordering;
            }
            offset += size;
        }
        Ordering::Equal
    }
}

/// The three projections of one tree's entries: the whole entry, its key,
/// and its value.
#[derive(Debug, Clone)]
pub struct RowTraits {
    entry: CompositeTraits,
    key: CompositeTraits,
    value: CompositeTraits,
}

impl RowTraits {
    /// The common case: opaque keys ordered lexicographically, opaque
    /// values, key bytes leading.
    pub fn fixed(key_size: u32, value_size: u32) -> Result<Self> {
        let mut builder = RowTraitsBuilder::new();
        let key = builder.add_span_field(key_size);
        builder.add_span_field(value_size);
        builder.add_key_reference(key)?;
        builder.build()
    }

    pub fn entry_traits(&self) -> &CompositeTraits {
        &self.entry
    }

    pub fn key_traits(&self) -> &CompositeTraits {
        &self.key
    }

    pub fn value_traits(&self) -> &CompositeTraits {
        &self.value
    }

    pub fn entry_size(&self) -> u32 {
        self.entry.size()
    }

    pub fn key_size(&self) -> u32 {
        self.key.size()
    }

    pub fn value_size(&self) -> u32 {
        self.value.size()
    }

    pub fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key.compare(a, b)
    }

    pub fn project_key(&self, entry: &[u8]) -> Vec<u8> {
        self.key.project(entry)
    }

    pub fn project_value(&self, entry: &[u8]) -> Vec<u8> {
        self.value.project(entry)
    }
}

/// Enumerates fields in entry order and records which subset forms the key.
#[derive(Debug, Default)]
pub struct RowTraitsBuilder {
    fields: Vec<FieldTraits>,
    key_refs: Vec<usize>,
    offset: u32,
}

impl RowTraitsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_span_field(&mut self, size: u32) -> usize {
        self.push(FieldTraits::Span {
            offset: self.offset,
            size,
        })
    }

    pub fn add_u32_field(&mut self) -> usize {
        self.push(FieldTraits::U32 {
            offset: self.offset,
        })
    }

    pub fn add_i32_field(&mut self) -> usize {
        self.push(FieldTraits::I32 {
            offset: self.offset,
        })
    }

    pub fn add_heap_field(&mut self) -> usize {
        self.push(FieldTraits::HeapRef {
            offset: self.offset,
        })
    }

    fn push(&mut self, field: FieldTraits) -> usize {
        self.offset += field.size();
        self.fields.push(field);
        self.fields.len() - 1
    }

    /// Marks a previously added field as part of the key.
    pub fn add_key_reference(&mut self, field: usize) -> Result<()> {
        if field >= self.fields.len() {
            return Err(Error::invalid_argument(format!(
                "invalid field reference: {}",
                field
            )));
        }
        if self.key_refs.contains(&field) {
            return Err(Error::invalid_argument(format!(
                "duplicate key reference: {}",
                field
            )));
        }
        self.key_refs.push(field);
        Ok(())
    }

    pub fn build(self) -> Result<RowTraits> {
        if self.key_refs.is_empty() {
            return Err(Error::invalid_argument("row traits require a key field"));
        }

        let key_fields: Vec<FieldTraits> =
            self.key_refs.iter().map(|&i| self.fields[i]).collect();
        let value_fields: Vec<FieldTraits> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.key_refs.contains(i))
            .map(|(_, f)| *f)
            .collect();

        let key = CompositeTraits::new(key_fields);
        let value = CompositeTraits::new(value_fields);

        if key.size() == 0 {
            return Err(Error::invalid_argument("key projection is empty"));
        }
        if value.size() == 0 {
            return Err(Error::invalid_argument("value projection is empty"));
        }

        Ok(RowTraits {
            entry: CompositeTraits::new(self.fields),
            key,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlockAllocator;
    use tempfile::tempdir;

    #[test]
    fn u32_field_orders_numerically() {
        let field = FieldTraits::U32 { offset: 0 };
        let small = 2u32.to_be_bytes();
        let large = 300u32.to_be_bytes();

        assert_eq!(field.compare(&small, &large), Ordering::Less);
        assert_eq!(field.compare(&large, &small), Ordering::Greater);
        assert_eq!(field.compare(&small, &small), Ordering::Equal);
    }

    #[test]
    fn i32_field_orders_negatives_before_positives() {
        let field = FieldTraits::I32 { offset: 0 };
        let neg = (-5i32).to_be_bytes();
        let pos = 5i32.to_be_bytes();

        assert_eq!(field.compare(&neg, &pos), Ordering::Less);
    }

    #[test]
    fn span_field_is_lexicographic() {
        let field = FieldTraits::Span { offset: 0, size: 3 };

        assert_eq!(field.compare(b"abc", b"abd"), Ordering::Less);
        assert_eq!(field.compare(b"abc", b"abc"), Ordering::Equal);
    }

    #[test]
    fn builder_lays_fields_out_in_order() {
        let mut builder = RowTraitsBuilder::new();
        let a = builder.add_u32_field();
        let b = builder.add_span_field(10);
        let c = builder.add_i32_field();

        assert_eq!((a, b, c), (0, 1, 2));
        builder.add_key_reference(a).unwrap();
        let traits = builder.build().unwrap();

        assert_eq!(traits.entry_size(), 18);
        assert_eq!(traits.key_size(), 4);
        assert_eq!(traits.value_size(), 14);
    }

    #[test]
    fn key_can_live_in_the_middle_of_the_entry() {
        let mut builder = RowTraitsBuilder::new();
        builder.add_span_field(2);
        let id = builder.add_u32_field();
        builder.add_span_field(2);
        builder.add_key_reference(id).unwrap();
        let traits = builder.build().unwrap();

        let mut entry = Vec::new();
        entry.extend_from_slice(b"vv");
        entry.extend_from_slice(&7u32.to_be_bytes());
        entry.extend_from_slice(b"ww");

        assert_eq!(traits.project_key(&entry), 7u32.to_be_bytes());
        assert_eq!(traits.project_value(&entry), b"vvww");
        assert_eq!(traits.entry_traits().project(&entry), entry);
    }

    #[test]
    fn composite_compares_field_by_field() {
        let mut builder = RowTraitsBuilder::new();
        let major = builder.add_u32_field();
        let minor = builder.add_i32_field();
        builder.add_span_field(1);
        builder.add_key_reference(major).unwrap();
        builder.add_key_reference(minor).unwrap();
        let traits = builder.build().unwrap();

        let key = |a: u32, b: i32| {
            let mut k = Vec::new();
            k.extend_from_slice(&a.to_be_bytes());
            k.extend_from_slice(&b.to_be_bytes());
            k
        };

        assert_eq!(traits.compare_keys(&key(1, 5), &key(2, -9)), Ordering::Less);
        assert_eq!(
            traits.compare_keys(&key(2, -1), &key(2, 1)),
            Ordering::Less
        );
        assert_eq!(traits.compare_keys(&key(3, 0), &key(3, 0)), Ordering::Equal);
    }

    #[test]
    fn invalid_key_reference_is_rejected() {
        let mut builder = RowTraitsBuilder::new();
        builder.add_u32_field();

        assert!(matches!(
            builder.add_key_reference(3),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn all_key_fields_leaves_no_value() {
        let mut builder = RowTraitsBuilder::new();
        let only = builder.add_u32_field();
        builder.add_key_reference(only).unwrap();

        assert!(matches!(builder.build(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn fixed_traits_cover_opaque_byte_trees() {
        let traits = RowTraits::fixed(4, 8).unwrap();

        assert_eq!(traits.key_size(), 4);
        assert_eq!(traits.value_size(), 8);
        assert_eq!(traits.entry_size(), 12);

        let entry = *b"keyAvalue_01";
        assert_eq!(traits.project_key(&entry), b"keyA");
        assert_eq!(traits.project_value(&entry), b"value_01");
    }

    #[test]
    fn heap_ref_field_fetches_slot_contents() {
        let dir = tempdir().unwrap();
        let mut cache = FileCache::new(dir.path());
        let tx = BlockAllocator::new(&mut cache).create_transaction().unwrap();

        let mut heap = Heap::new();
        let slot = heap.allocate(&mut cache, tx).unwrap();
        Heap::write(&mut cache, slot, b"spilled payload").unwrap();

        let mut builder = RowTraitsBuilder::new();
        let id = builder.add_u32_field();
        let blob = builder.add_heap_field();
        builder.add_key_reference(id).unwrap();
        let traits = builder.build().unwrap();

        let mut entry = Vec::new();
        entry.extend_from_slice(&1u32.to_be_bytes());
        entry.extend_from_slice(&slot.to_bytes());

        let field = traits.entry_traits().fields()[blob];
        let fetched = field.fetch(&mut cache, &entry).unwrap();
        assert_eq!(&fetched[..15], b"spilled payload");
        assert_eq!(fetched.len(), crate::config::HEAP_SLOT_SIZE);
    }
}
