//! Property-based tests for value isolation and persistence

use focus_cache::{CacheConfig, ObjectCache};
use proptest::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// Arbitrary JSON documents a few levels deep
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Mutating a fetched value never changes what the cache returns next
proptest! {
    #[test]
    fn prop_fetched_values_are_copies(value in json_strategy()) {
        let dir = TempDir::new().unwrap();
        let cache = ObjectCache::new(CacheConfig::with_cache_dir(dir.path())).unwrap();
        prop_assert!(cache.set("doc", &value, "docs"));

        let mut fetched = cache.get_value("doc", "docs", false).unwrap();
        fetched = Value::Array(vec![fetched, Value::from("mutated")]);
        prop_assert_ne!(&fetched, &value);

        prop_assert_eq!(cache.get_value("doc", "docs", false), Some(value));
    }
}

/// What one instance writes, a fresh instance reads back unchanged
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_values_survive_reopen(value in json_strategy()) {
        let dir = TempDir::new().unwrap();
        {
            let writer = ObjectCache::new(CacheConfig::with_cache_dir(dir.path())).unwrap();
            prop_assert!(writer.set("doc", &value, "docs"));
        }

        let reader = ObjectCache::new(CacheConfig::with_cache_dir(dir.path())).unwrap();
        prop_assert_eq!(reader.get_value("doc", "docs", false), Some(value));
    }
}
