//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the store, the glob matcher and the shard router.

use proptest::prelude::*;
use std::collections::HashSet;

use crate::cache::{glob_match, shard_for, CacheStore, ShardedKeyspace};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 1000;

// == Strategies ==
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,32}"
}

fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,64}"
}

fn entity_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,40}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Statistics accuracy: hits and misses match what the reads observed.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let mut store = CacheStore::new(TEST_MAX_ENTRIES);
        let mut live: HashSet<String> = HashSet::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    store.set(&key, value, None).unwrap();
                    live.insert(key);
                }
                CacheOp::Get { key } => {
                    let found = store.get(&key).unwrap();
                    prop_assert_eq!(found.is_some(), live.contains(&key));
                    if live.contains(&key) {
                        expected_hits += 1;
                    } else {
                        expected_misses += 1;
                    }
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(store.delete(&key), live.remove(&key));
                }
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.total_entries, live.len());
    }

    // Capacity enforcement: the store never holds more than max_entries keys.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((valid_key_strategy(), valid_value_strategy()), 1..200)
    ) {
        let max_entries = 50;
        let mut store = CacheStore::new(max_entries);

        for (key, value) in entries {
            store.set(&key, value, None).unwrap();
            prop_assert!(store.len() <= max_entries);
        }
    }

    // LRU eviction order: a read protects a key, the next oldest is evicted.
    #[test]
    fn prop_lru_eviction_order(
        keys in prop::collection::hash_set(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy(),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        prop_assume!(!keys.contains(&new_key));

        let mut store = CacheStore::new(keys.len());
        for key in &keys {
            store.set(key, format!("value_{key}"), None).unwrap();
        }
        store.get(&keys[0]).unwrap();
        store.set(&new_key, "new".to_string(), None).unwrap();

        prop_assert_eq!(store.len(), keys.len());
        prop_assert!(store.get(&keys[0]).unwrap().is_some());
        prop_assert!(store.get(&keys[1]).unwrap().is_none());
        prop_assert!(store.get(&new_key).unwrap().is_some());
    }

    // Scan completeness: paging through a pattern returns every matching key
    // exactly once, even when returned keys are deleted between pages.
    #[test]
    fn prop_scan_returns_every_match_once(
        ids in prop::collection::hash_set(entity_id_strategy(), 1..60),
        page_size in 1usize..20,
    ) {
        let mut store = CacheStore::new(TEST_MAX_ENTRIES);
        let mut expected = HashSet::new();
        for (i, id) in ids.iter().enumerate() {
            let key = if i % 3 == 0 {
                format!("bundle:{}:{id}", i % 8)
            } else {
                format!("access:{}:{id}", i % 16)
            };
            store.set(&key, "{}".to_string(), Some(300)).unwrap();
            if key.starts_with("access:") {
                expected.insert(key);
            }
        }

        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let (next, page) = store.scan(cursor, "access:*:*", page_size);
            for key in page {
                prop_assert!(seen.insert(key.clone()), "key {} returned twice", key);
                store.delete(&key);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        prop_assert_eq!(seen, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Shard stability: same id, same shard, always within range.
    #[test]
    fn prop_shard_is_stable_and_in_range(id in entity_id_strategy(), shards in 1u32..64) {
        let shard = shard_for(&id, shards);
        prop_assert!(shard < shards);
        prop_assert_eq!(shard, shard_for(&id, shards));
        prop_assert_eq!(shard_for(&id, 1), 0);
    }

    // Every key built by a keyspace is covered by its namespace and shard patterns.
    #[test]
    fn prop_keyspace_patterns_cover_keys(
        id in entity_id_strategy(),
        suffix in "[a-z]{1,10}",
        shards in 1u32..32,
    ) {
        let keyspace = ShardedKeyspace::new("access", shards);
        let key = keyspace.key(&id);
        let shard = keyspace.shard_of(&id);

        prop_assert!(glob_match(&keyspace.all_pattern(), &key));
        prop_assert!(glob_match(&keyspace.shard_pattern(shard), &key));
        prop_assert!(glob_match(
            &keyspace.entity_pattern(&id),
            &keyspace.key_with_suffix(&id, &suffix)
        ));
        prop_assert!(!glob_match(&ShardedKeyspace::new("bundle", shards).all_pattern(), &key));
    }

    // Glob basics: a literal matches itself and `*` matches anything.
    #[test]
    fn prop_glob_literal_and_wildcard(key in "[a-z0-9:_-]{0,40}") {
        prop_assert!(glob_match(&key, &key));
        prop_assert!(glob_match("*", &key));
        let prefixed = format!("{key}*");
        let tailed = format!("{key}tail");
        prop_assert!(glob_match(&prefixed, &tailed));
    }
}
