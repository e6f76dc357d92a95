use std::collections::BTreeSet;
use std::sync::Arc;
use anyhow::Result;
use rand::prelude::*;

mod common;
use common::create_test_buffer_pool;

use quarzdb::common::types::Rid;
use quarzdb::index::btree::BPlusTree;

fn rid_for(key: i32) -> Rid {
    Rid::new(key, key as u32)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in [5, 1, 9, 3, 7] {
        assert!(tree.insert(key, rid_for(key))?);
    }

    for key in [1, 3, 5, 7, 9] {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get(&2)?, None);
    assert_eq!(tree.get(&10)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    assert!(tree.insert(42, rid_for(42))?);
    assert!(!tree.insert(42, Rid::new(999, 0))?);
    assert_eq!(tree.get(&42)?, Some(rid_for(42)));
    Ok(())
}

#[test]
fn test_leaf_split_structure() -> Result<()> {
    // Scenario: leaf_max 4, inserting 1..=5 splits into {1,2} and {3,4,5}
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in 1..=5 {
        assert!(tree.insert(key, rid_for(key))?);
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![1, 2, 3, 4, 5]);

    // The root became an internal node above two leaves
    assert_ne!(tree.root_page_id(), -1);
    for key in 1..=5 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_iterator_ascending_no_duplicates() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    let mut keys: Vec<i32> = (1..=200).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(7));
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?);
    }

    let scanned: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    let expected: Vec<i32> = (1..=200).collect();
    assert_eq!(scanned, expected);
    Ok(())
}

#[test]
fn test_delete_collapses_root() -> Result<()> {
    // Scenario: insert 1..10, delete 1..7, iterator yields 8,9,10 from a
    // single leaf root
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in 1..=10 {
        assert!(tree.insert(key, rid_for(key))?);
    }
    for key in 1..=7 {
        assert!(tree.remove(&key)?);
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![8, 9, 10]);

    for key in 1..=7 {
        assert_eq!(tree.get(&key)?, None);
    }
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_delete_everything_empties_tree() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in 1..=50 {
        tree.insert(key, rid_for(key))?;
    }
    for key in 1..=50 {
        assert!(tree.remove(&key)?);
    }

    assert!(tree.is_empty());
    assert_eq!(tree.iter()?.count(), 0);
    assert!(!tree.remove(&1)?);

    // The tree grows again from empty
    assert!(tree.insert(3, rid_for(3))?);
    assert_eq!(tree.get(&3)?, Some(rid_for(3)));
    Ok(())
}

#[test]
fn test_matches_model_set_under_random_workload() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;
    let mut model = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(1234);

    for _ in 0..2000 {
        let key = rng.gen_range(0..500);
        if rng.gen_bool(0.6) {
            assert_eq!(tree.insert(key, rid_for(key))?, model.insert(key));
        } else {
            assert_eq!(tree.remove(&key)?, model.remove(&key));
        }
    }

    let scanned: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    let expected: Vec<i32> = model.iter().copied().collect();
    assert_eq!(scanned, expected);

    for key in 0..500 {
        assert_eq!(tree.get(&key)?.is_some(), model.contains(&key));
    }
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_range_scan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in (0..100).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    let rids = tree.range_scan(&10, &20)?;
    let expected: Vec<Rid> = (10..=20).step_by(2).map(rid_for).collect();
    assert_eq!(rids, expected);

    // Bounds that fall between keys
    let rids = tree.range_scan(&11, &15)?;
    assert_eq!(rids, vec![rid_for(12), rid_for(14)]);

    assert!(tree.range_scan(&20, &10)?.is_empty());
    Ok(())
}

#[test]
fn test_iter_from_mid_key() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;

    for key in 1..=50 {
        tree.insert(key, rid_for(key))?;
    }

    let keys: Vec<i32> = tree.iter_from(&37)?.map(|(k, _)| k).collect();
    let expected: Vec<i32> = (37..=50).collect();
    assert_eq!(keys, expected);
    Ok(())
}

#[test]
fn test_string_keys() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<String> = BPlusTree::new("by_name", buffer_pool, 4, 4)?;

    for name in ["walnut", "aspen", "maple", "oak", "birch", "cedar"] {
        assert!(tree.insert(name.to_string(), Rid::new(1, name.len() as u32))?);
    }

    let keys: Vec<String> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["aspen", "birch", "cedar", "maple", "oak", "walnut"]);
    Ok(())
}

#[test]
fn test_root_survives_reopen() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;

    {
        let tree: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool.clone(), 4, 4)?;
        for key in 1..=20 {
            tree.insert(key, rid_for(key))?;
        }
    }

    // A second handle over the same pool finds the root in the header page
    let reopened: BPlusTree<i32> = BPlusTree::new("pk", buffer_pool, 4, 4)?;
    for key in 1..=20 {
        assert_eq!(reopened.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_disjoint_ranges() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i32>> = Arc::new(BPlusTree::new("pk", buffer_pool, 4, 4)?);

    const THREADS: i32 = 4;
    const PER_THREAD: i32 = 250;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            let base = t * PER_THREAD;
            for key in base..base + PER_THREAD {
                assert!(tree.insert(key, rid_for(key)).unwrap());
            }
            // Delete the odd keys of this thread's range
            for key in (base + 1..base + PER_THREAD).step_by(2) {
                assert!(tree.remove(&key).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Same final tree as the serial interleaving: even keys remain
    let scanned: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    let expected: Vec<i32> = (0..THREADS * PER_THREAD).step_by(2).collect();
    assert_eq!(scanned, expected);
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_concurrent_readers_and_writers() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i32>> = Arc::new(BPlusTree::new("pk", buffer_pool, 8, 8)?);

    for key in 0..100 {
        tree.insert(key, rid_for(key))?;
    }

    let mut handles = Vec::new();
    // Writers extend the key space upward
    for t in 0..2 {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            let base = 100 + t * 200;
            for key in base..base + 200 {
                tree.insert(key, rid_for(key)).unwrap();
            }
        }));
    }
    // Readers repeatedly check the stable prefix
    for _ in 0..2 {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..20 {
                for key in 0..100 {
                    assert_eq!(tree.get(&key).unwrap(), Some(rid_for(key)));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len()?, 500);
    Ok(())
}
