#![no_main]

//! Fuzz target for the persistent bucket map
//!
//! Applies random inserts and replacements to both a `ConcurrentBucketMap`
//! and a `HashMap` model, with small bucket options so rehashes happen
//! often, and checks that every key agrees after every step. Old snapshots
//! must stay unchanged.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_injector::{ConcurrentBucketMap, MapOptions};
use std::collections::HashMap;

#[derive(Debug, Arbitrary)]
enum MapOp {
    TryAdd(u16, u32),
    AddOrReplace(u16, u32),
    GetOrAdd(u16, u32),
    Find(u16),
    Snapshot,
}

#[derive(Debug, Arbitrary)]
struct Input {
    initial_buckets: u8,
    max_bucket_height: u8,
    ops: Vec<MapOp>,
}

fuzz_target!(|input: Input| {
    let options = MapOptions {
        initial_buckets: usize::from(input.initial_buckets % 16) + 1,
        max_bucket_height: u32::from(input.max_bucket_height % 6) + 1,
    };
    let map = ConcurrentBucketMap::with_options(options);
    let mut model: HashMap<u16, u32> = HashMap::new();
    let mut frozen = Vec::new();

    for op in input.ops.into_iter().take(512) {
        match op {
            MapOp::TryAdd(k, v) => {
                let added = map.try_add(k, v);
                assert_eq!(added, !model.contains_key(&k));
                model.entry(k).or_insert(v);
            }
            MapOp::AddOrReplace(k, v) => {
                let replaced = map.add_or_replace(k, v);
                assert_eq!(replaced, model.insert(k, v).is_some());
            }
            MapOp::GetOrAdd(k, v) => {
                let (value, added) = map.get_or_add(k, || v);
                assert_eq!(added, !model.contains_key(&k));
                assert_eq!(value, *model.entry(k).or_insert(v));
            }
            MapOp::Find(k) => {
                assert_eq!(map.try_find(&k), model.get(&k).copied());
            }
            MapOp::Snapshot => {
                if frozen.len() < 8 {
                    frozen.push((map.snapshot(), model.clone()));
                }
            }
        }
        assert_eq!(map.len(), model.len());
    }

    for (k, v) in &model {
        assert_eq!(map.try_find(k), Some(*v));
    }
    for (snapshot, expected) in &frozen {
        assert_eq!(snapshot.len(), expected.len());
        for (k, v) in expected {
            assert_eq!(snapshot.get(k), Some(v));
        }
    }
});
