//! Property-based tests for the serving plane.
//!
//! Covers: cache key derivation invariants, cache round-trips, batch order
//! preservation, and chunk sizing bounds.

use std::collections::BTreeMap;

use perkon_core::config::{BatchConfig, CacheConfig, CacheNamespace};
use perkon_core::FeatureVector;
use perkon_serving::{canonical_json, BatchProcessor, MemoryStore, TtlCache, TtlStore};
use proptest::prelude::*;

/// Strategy for generating feature maps with unique names and finite values.
fn arb_features() -> impl Strategy<Value = BTreeMap<String, f64>> {
    prop::collection::btree_map(
        "[a-z][a-z0-9_]{0,10}",
        any::<f64>().prop_filter("must be finite", |f| f.is_finite()),
        1..8,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cache keys must not depend on feature insertion order.
    #[test]
    fn cache_key_ignores_insertion_order(features in arb_features()) {
        let mut forward = FeatureVector::default();
        for (name, value) in &features {
            forward.insert(name.clone(), *value);
        }
        let mut reversed = FeatureVector::default();
        for (name, value) in features.iter().rev() {
            reversed.insert(name.clone(), *value);
        }

        let a = serde_json::to_value(&forward).unwrap();
        let b = serde_json::to_value(&reversed).unwrap();
        prop_assert_eq!(
            TtlCache::key(CacheNamespace::Prediction, "model", &a),
            TtlCache::key(CacheNamespace::Prediction, "model", &b)
        );
    }

    /// Canonicalization is deterministic and sorts object keys.
    #[test]
    fn canonical_json_deterministic(features in arb_features()) {
        let mut shuffled = FeatureVector::default();
        for (name, value) in features.iter().rev() {
            shuffled.insert(name.clone(), *value);
        }
        let value = serde_json::to_value(&shuffled).unwrap();

        let first = canonical_json(&value);
        let second = canonical_json(&value);
        prop_assert_eq!(&first, &second);

        // Keys appear in sorted order in the canonical form.
        let mut last_pos = 0;
        for name in features.keys() {
            let needle = format!("\"{}\":", name);
            let pos = first[last_pos..].find(&needle);
            prop_assert!(pos.is_some(), "key {} missing or out of order", name);
            last_pos += pos.unwrap();
        }
    }

    /// Fresh entries survive a set/get round-trip unchanged.
    #[test]
    fn cache_set_get_roundtrip(key in "[a-z0-9:]{1,32}", value in any::<f64>().prop_filter("must be finite", |f| f.is_finite())) {
        let cache = TtlCache::new(&CacheConfig::default());
        cache.set(CacheNamespace::Prediction, &key, serde_json::json!(value));
        prop_assert_eq!(cache.get(&key), Some(serde_json::json!(value)));
    }

    /// Batch results come back in input order for any input size.
    #[test]
    fn batch_preserves_order(items in prop::collection::vec(any::<i64>(), 0..200)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let outcome = rt.block_on(async {
            let processor = BatchProcessor::new(BatchConfig {
                max_chunk_size: 7,
                min_chunk_size: 1,
                ..BatchConfig::default()
            });
            processor
                .process(items.clone(), |chunk: Vec<i64>| async move {
                    Ok::<_, String>(chunk.into_iter().map(|v| v.wrapping_mul(3)).collect::<Vec<i64>>())
                })
                .await
        });

        prop_assert_eq!(outcome.results.len(), items.len());
        for (i, result) in outcome.results.iter().enumerate() {
            let value = result.as_ref().expect("no failures in this worker");
            prop_assert_eq!(*value, items[i].wrapping_mul(3));
        }
    }

    /// The adaptive chunk cap never leaves its configured bounds.
    #[test]
    fn chunk_size_always_clamped(size in any::<usize>()) {
        let processor = BatchProcessor::new(BatchConfig::default());
        processor.set_chunk_size(size);
        let current = processor.current_chunk_size();
        prop_assert!(
            (10..=100).contains(&current),
            "chunk size {} escaped [10, 100]",
            current
        );
    }

    /// Prefix listing returns keys in sorted order.
    #[test]
    fn store_prefix_listing_sorted(names in prop::collection::btree_set("[a-z]{1,8}", 1..10)) {
        let store = MemoryStore::new();
        for name in &names {
            store
                .put(&format!("report:{}", name), serde_json::json!(1), None)
                .unwrap();
        }

        let listed = store.keys_with_prefix("report:").unwrap();
        prop_assert_eq!(listed.len(), names.len());
        let mut sorted = listed.clone();
        sorted.sort();
        prop_assert_eq!(listed, sorted);
    }
}
