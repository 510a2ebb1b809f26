//! Copy-on-write behaviour across transactions: snapshot isolation through
//! old root pointers, the on-disk stamp invariants, and a randomized model
//! test against `std::collections::BTreeMap`.

use std::collections::BTreeMap;
use std::fs;

use cowdb::config::BLOCK_SIZE;
use cowdb::{BTree, BlockAllocator, FarPtr, FileCache, RowTraits};
use tempfile::tempdir;

const KEY_SIZE: usize = 8;
const VALUE_SIZE: usize = 8;

fn make_entry(key: u64, value: u64) -> Vec<u8> {
    let mut e = Vec::with_capacity(KEY_SIZE + VALUE_SIZE);
    e.extend_from_slice(&key.to_be_bytes());
    e.extend_from_slice(&value.to_be_bytes());
    e
}

fn traits() -> RowTraits {
    RowTraits::fixed(KEY_SIZE as u32, VALUE_SIZE as u32).unwrap()
}

fn lookup(cache: &mut FileCache, root: FarPtr, key: u64) -> Option<u64> {
    let mut tree = BTree::new(cache, root, traits()).unwrap();
    let cursor = tree.seek_begin(&key.to_be_bytes()).unwrap();
    if !cursor.is_found() {
        return None;
    }
    let entry = tree.get_entry(&cursor).unwrap();
    Some(u64::from_be_bytes(entry[KEY_SIZE..].try_into().unwrap()))
}

#[test]
fn old_roots_keep_reading_old_versions() {
    let dir = tempdir().unwrap();
    let mut cache = FileCache::new(dir.path());

    let t1 = BlockAllocator::new(&mut cache).create_transaction().unwrap();
    let root_t1 = {
        let mut tree = BTree::new(&mut cache, FarPtr::NULL, traits()).unwrap();
        for key in 0u64..100 {
            tree.upsert(t1, &make_entry(key, key * 10)).unwrap();
        }
        tree.root()
    };

    let t2 = BlockAllocator::new(&mut cache).create_transaction().unwrap();
    let root_t2 = {
        let mut tree = BTree::new(&mut cache, root_t1, traits()).unwrap();
        let cursor = tree.seek_begin(&42u64.to_be_bytes()).unwrap();
        tree.update(t2, &cursor, &make_entry(42, 9999)).unwrap();
        tree.root()
    };

    assert_ne!(root_t1, root_t2);

    // The superseded snapshot still resolves to the old value; the live
    // tree sees the new one. Untouched keys agree across both roots.
    assert_eq!(lookup(&mut cache, root_t1, 42), Some(420));
    assert_eq!(lookup(&mut cache, root_t2, 42), Some(9999));
    assert_eq!(lookup(&mut cache, root_t1, 7), Some(70));
    assert_eq!(lookup(&mut cache, root_t2, 7), Some(70));
}

#[test]
fn snapshot_survives_removals_in_later_transactions() {
    let dir = tempdir().unwrap();
    let mut cache = FileCache::new(dir.path());

    let t1 = BlockAllocator::new(&mut cache).create_transaction().unwrap();
    let root_t1 = {
        let mut tree = BTree::new(&mut cache, FarPtr::NULL, traits()).unwrap();
        for key in 0u64..50 {
            tree.upsert(t1, &make_entry(key, key)).unwrap();
        }
        tree.root()
    };

    let t2 = BlockAllocator::new(&mut cache).create_transaction().unwrap();
    {
        let mut tree = BTree::new(&mut cache, root_t1, traits()).unwrap();
        for key in 0u64..50 {
            let cursor = tree.seek_begin(&key.to_be_bytes()).unwrap();
            tree.remove(t2, &cursor).unwrap();
        }
        assert!(tree.root().is_null());
    }

    // The old snapshot still iterates all 50 entries.
    let mut tree = BTree::new(&mut cache, root_t1, traits()).unwrap();
    assert_eq!(tree.count().unwrap(), 50);
}

#[test]
fn data_files_carry_uniform_transaction_stamps() {
    let dir = tempdir().unwrap();
    let mut cache = FileCache::new(dir.path());

    // Three transactions, each mutating the tree, so multiple data files
    // exist with distinct stamps.
    let mut root = FarPtr::NULL;
    for round in 0u64..3 {
        let tx = BlockAllocator::new(&mut cache).create_transaction().unwrap();
        let mut tree = BTree::new(&mut cache, root, traits()).unwrap();
        for key in 0u64..40 {
            tree.upsert(tx, &make_entry(key, round)).unwrap();
        }
        root = tree.root();
    }
    drop(cache);

    // Every data file: whole blocks only, every block stamped with the same
    // transaction as the file's first block.
    let mut data_files = 0;
    for entry in fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let id: u64 = name
            .strip_prefix("file_")
            .and_then(|s| s.strip_suffix(".bin"))
            .unwrap()
            .parse()
            .unwrap();
        if id == 0 {
            continue;
        }

        data_files += 1;
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0, "{} holds partial blocks", name);

        let file_stamp = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        assert_ne!(file_stamp, 0);
        for block in bytes.chunks(BLOCK_SIZE) {
            let stamp = u64::from_be_bytes(block[..8].try_into().unwrap());
            assert_eq!(stamp, file_stamp, "mixed stamps in {}", name);
        }
    }
    assert!(data_files >= 3);
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[test]
fn random_operations_match_reference_model() {
    let dir = tempdir().unwrap();
    let mut cache = FileCache::new(dir.path());
    let mut rng = XorShift(0x1234_5678_9ABC_DEF0);
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();
    let mut root = FarPtr::NULL;

    // Wide entries keep capacity small so splits and merges fire often; the
    // key range keeps collisions common so removes hit real entries.
    let traits = RowTraits::fixed(96, 32).unwrap();
    let make_wide = |key: u64, value: u64| {
        let mut e = vec![0u8; 128];
        e[..8].copy_from_slice(&key.to_be_bytes());
        e[96..104].copy_from_slice(&value.to_be_bytes());
        e
    };

    for round in 0..6 {
        let tx = BlockAllocator::new(&mut cache).create_transaction().unwrap();
        let mut tree = BTree::new(&mut cache, root, traits.clone()).unwrap();

        for _ in 0..120 {
            let key = rng.next() % 160;
            let mut key_bytes = [0u8; 96];
            key_bytes[..8].copy_from_slice(&key.to_be_bytes());

            if rng.next() % 3 == 0 {
                let cursor = tree.seek_begin(&key_bytes).unwrap();
                if cursor.is_found() {
                    tree.remove(tx, &cursor).unwrap();
                    assert!(model.remove(&key).is_some());
                } else {
                    assert!(!model.contains_key(&key));
                }
            } else {
                let value = rng.next();
                tree.upsert(tx, &make_wide(key, value)).unwrap();
                model.insert(key, value);
            }
        }

        // Full ordered comparison against the model after every round.
        let mut cursor = tree.begin().unwrap();
        for (&key, &value) in model.iter() {
            assert!(!cursor.is_ended(), "tree ended early in round {}", round);
            let entry = tree.get_entry(&cursor).unwrap();
            assert_eq!(u64::from_be_bytes(entry[..8].try_into().unwrap()), key);
            assert_eq!(
                u64::from_be_bytes(entry[96..104].try_into().unwrap()),
                value
            );
            cursor = tree.next(&cursor).unwrap();
        }
        assert!(cursor.is_ended(), "tree has extra entries in round {}", round);

        root = tree.root();
    }
}
