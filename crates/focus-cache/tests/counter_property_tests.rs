//! Property-based tests for counter clamping

use std::sync::Arc;

use focus_cache::{CacheBuilder, MemoryStore, ObjectCache};
use proptest::prelude::*;

fn memory_cache() -> ObjectCache {
    CacheBuilder::new()
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap()
}

#[derive(Debug, Clone)]
enum CounterOp {
    Incr(i64),
    Decr(i64),
}

fn op_strategy() -> impl Strategy<Value = CounterOp> {
    prop_oneof![
        (-1_000i64..1_000).prop_map(CounterOp::Incr),
        (-1_000i64..1_000).prop_map(CounterOp::Decr),
    ]
}

/// Any sequence of incr/decr leaves a counter at max(0, running total),
/// clamped after every step
proptest! {
    #[test]
    fn prop_counter_never_negative(
        start in 0i64..1_000,
        ops in prop::collection::vec(op_strategy(), 1..50)
    ) {
        let cache = memory_cache();
        prop_assert!(cache.set("n", &start, "counters"));

        let mut expected = start;
        for op in ops {
            let result = match op {
                CounterOp::Incr(offset) => {
                    expected = (expected + offset).max(0);
                    cache.incr("n", offset, "counters")
                }
                CounterOp::Decr(offset) => {
                    expected = (expected - offset).max(0);
                    cache.decr("n", offset, "counters")
                }
            };
            prop_assert_eq!(result, Some(expected));
        }

        prop_assert_eq!(cache.get::<i64>("n", "counters"), Some(expected));
    }
}

/// Counters on absent keys stay absent
proptest! {
    #[test]
    fn prop_counter_on_missing_key_is_none(offset in any::<i64>()) {
        let cache = memory_cache();
        prop_assert_eq!(cache.incr("missing", offset, "counters"), None);
        prop_assert_eq!(cache.decr("missing", offset, "counters"), None);
        prop_assert_eq!(cache.get_value("missing", "counters", false), None);
    }
}
