use std::sync::Arc;
use anyhow::Result;
use rand::prelude::*;

mod common;
use common::create_test_buffer_pool;

use quarzdb::common::types::Rid;
use quarzdb::index::hash::{ExtendibleHashTable, KeyHasher};

fn rid_for(key: i32) -> Rid {
    Rid::new(key, key as u32)
}

/// Routes every key by its own low bits, making bucket placement
/// predictable in tests
struct IdentityHasher;

impl KeyHasher<i32> for IdentityHasher {
    fn hash(&self, key: &i32) -> u32 {
        *key as u32
    }
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::new("ht", buffer_pool, 4)?;

    for key in 0..50 {
        assert!(table.insert(&key, rid_for(key))?);
    }
    for key in 0..50 {
        assert_eq!(table.get_value(&key)?, vec![rid_for(key)]);
    }
    assert!(table.get_value(&99)?.is_empty());
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected_but_values_multi() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::new("ht", buffer_pool, 4)?;

    assert!(table.insert(&7, Rid::new(1, 1))?);
    assert!(!table.insert(&7, Rid::new(1, 1))?, "exact pair duplicate");
    assert!(table.insert(&7, Rid::new(2, 2))?, "same key, new value");

    let mut values = table.get_value(&7)?;
    values.sort();
    assert_eq!(values, vec![Rid::new(1, 1), Rid::new(2, 2)]);
    Ok(())
}

#[test]
fn test_split_grows_directory() -> Result<()> {
    // Scenario: capacity-4 bucket, 5 keys with identical low bits force the
    // directory to at least depth 2 and all keys stay retrievable
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::with_hasher(
        "ht",
        buffer_pool,
        4,
        Box::new(IdentityHasher),
    )?;

    assert_eq!(table.global_depth()?, 0);

    // Keys 0, 4, 8, 12, 16: identical in their two low bits
    let keys = [0, 4, 8, 12, 16];
    for &key in &keys {
        assert!(table.insert(&key, rid_for(key))?);
    }

    assert!(table.global_depth()? >= 2);
    for &key in &keys {
        assert_eq!(table.get_value(&key)?, vec![rid_for(key)]);
    }
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_remove_then_miss() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::new("ht", buffer_pool, 4)?;

    for key in 0..20 {
        table.insert(&key, rid_for(key))?;
    }
    for key in 0..10 {
        assert!(table.remove(&key, &rid_for(key))?);
        assert!(!table.remove(&key, &rid_for(key))?, "second remove misses");
    }

    for key in 0..10 {
        assert!(table.get_value(&key)?.is_empty());
    }
    for key in 10..20 {
        assert_eq!(table.get_value(&key)?, vec![rid_for(key)]);
    }
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_merge_and_shrink() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::with_hasher(
        "ht",
        buffer_pool,
        4,
        Box::new(IdentityHasher),
    )?;

    // Grow the directory with colliding keys, then remove everything
    for &key in &[0, 4, 8, 12, 16, 1, 5, 9, 13, 2, 6, 3, 7] {
        assert!(table.insert(&key, rid_for(key))?);
    }
    let grown_depth = table.global_depth()?;
    assert!(grown_depth >= 2);

    for &key in &[0, 4, 8, 12, 16, 1, 5, 9, 13, 2, 6, 3, 7] {
        assert!(table.remove(&key, &rid_for(key))?);
    }

    // Empty buckets merged and the directory shrank back
    assert!(table.global_depth()? < grown_depth);
    table.verify_integrity()?;

    // Table still works after shrinking
    assert!(table.insert(&5, rid_for(5))?);
    assert_eq!(table.get_value(&5)?, vec![rid_for(5)]);
    Ok(())
}

#[test]
fn test_random_workload_against_model() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let table: ExtendibleHashTable<i32> = ExtendibleHashTable::new("ht", buffer_pool, 4)?;
    let mut model = std::collections::HashSet::new();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..2000 {
        let key = rng.gen_range(0..300);
        if rng.gen_bool(0.6) {
            assert_eq!(table.insert(&key, rid_for(key))?, model.insert(key));
        } else {
            assert_eq!(table.remove(&key, &rid_for(key))?, model.remove(&key));
        }
    }

    for key in 0..300 {
        let found = table.get_value(&key)?;
        if model.contains(&key) {
            assert_eq!(found, vec![rid_for(key)]);
        } else {
            assert!(found.is_empty());
        }
    }
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_directory_survives_reopen() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;

    {
        let table: ExtendibleHashTable<i32> =
            ExtendibleHashTable::new("ht", buffer_pool.clone(), 4)?;
        for key in 0..30 {
            table.insert(&key, rid_for(key))?;
        }
    }

    let reopened: ExtendibleHashTable<i32> = ExtendibleHashTable::new("ht", buffer_pool, 4)?;
    for key in 0..30 {
        assert_eq!(reopened.get_value(&key)?, vec![rid_for(key)]);
    }
    Ok(())
}

#[test]
fn test_concurrent_inserts_and_lookups() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let table: Arc<ExtendibleHashTable<i32>> =
        Arc::new(ExtendibleHashTable::new("ht", buffer_pool, 4)?);

    const THREADS: i32 = 4;
    const PER_THREAD: i32 = 200;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let table = table.clone();
        handles.push(std::thread::spawn(move || {
            let base = t * PER_THREAD;
            for key in base..base + PER_THREAD {
                assert!(table.insert(&key, rid_for(key)).unwrap());
            }
            for key in base..base + PER_THREAD {
                assert_eq!(table.get_value(&key).unwrap(), vec![rid_for(key)]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..THREADS * PER_THREAD {
        assert_eq!(table.get_value(&key)?, vec![rid_for(key)]);
    }
    table.verify_integrity()?;
    Ok(())
}
