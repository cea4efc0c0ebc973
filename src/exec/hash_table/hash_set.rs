// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Append-only distinct set with a single-level and a sharded two-level layout.
//!
//! Each shard keeps its keys in insertion order in a `Vec` and indexes them
//! with a hashbrown table of `(index, hash)` entries. A single-level set has
//! one shard; promotion re-homes every key into one of `NUM_SHARDS` shards by
//! four hash bits starting at bit 32, clear of the top bits hashbrown uses
//! as its control tag. Iteration walks shards in order and each shard
//! in insertion order, so output is deterministic for a given input order.

use std::mem::size_of;

use hashbrown::HashTable;

use crate::common::bit_util;
use crate::common::error::Result;

pub(crate) const NUM_SHARDS: usize = 16;
const SHARD_BITS_OFFSET: u32 = 32;
const SHARD_BITS: u32 = NUM_SHARDS.trailing_zeros();

/// A key that can live in a [`DistinctHashSet`].
pub trait DistinctKey: Eq {
    fn hash_with_seed(&self, seed: u64) -> u64;

    /// Heap bytes owned by the key beyond its inline size.
    fn heap_bytes(&self) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug)]
struct KeyEntry {
    index: usize,
    hash: u64,
}

struct Shard<K> {
    table: HashTable<KeyEntry>,
    keys: Vec<K>,
}

impl<K: DistinctKey> Shard<K> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
        }
    }

    fn contains(&self, hash: u64, key: &K) -> bool {
        let keys = &self.keys;
        self.table
            .find(hash, |e| e.hash == hash && keys[e.index] == *key)
            .is_some()
    }

    /// Append a key known to be absent. Reserves before mutating so a failed
    /// allocation leaves the shard untouched.
    fn push_unique(&mut self, hash: u64, key: K) -> Result<()> {
        self.keys.try_reserve(1)?;
        self.table.try_reserve(1, |e| e.hash)?;
        let index = self.keys.len();
        self.keys.push(key);
        self.table
            .insert_unique(hash, KeyEntry { index, hash }, |e| e.hash);
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        // one control byte per bucket
        self.table.capacity() * (size_of::<KeyEntry>() + 1) + self.keys.capacity() * size_of::<K>()
    }
}

/// Position inside a set: shard number and index within that shard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashSetCursor {
    shard: usize,
    index: usize,
}

pub struct DistinctHashSet<K> {
    shards: Vec<Shard<K>>,
    seed: u64,
    size: usize,
    key_heap_bytes: usize,
}

impl<K: DistinctKey> DistinctHashSet<K> {
    /// `initial_capacity` is rounded up to a power of two.
    pub fn with_capacity(initial_capacity: usize, seed: u64) -> Self {
        Self {
            shards: vec![Shard::with_capacity(bucket_capacity(initial_capacity))],
            seed,
            size: 0,
            key_heap_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_two_level(&self) -> bool {
        self.shards.len() > 1
    }

    pub fn hash_of(&self, key: &K) -> u64 {
        key.hash_with_seed(self.seed)
    }

    fn shard_of(&self, hash: u64) -> usize {
        if self.is_two_level() {
            shard_index(hash)
        } else {
            0
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        self.shards[self.shard_of(hash)].contains(hash, key)
    }

    /// Returns whether the key was new. On allocation failure the key is not
    /// inserted and every previously inserted key stays valid.
    pub fn insert(&mut self, key: K) -> Result<bool> {
        let hash = self.hash_of(&key);
        let shard_idx = self.shard_of(hash);
        let shard = &mut self.shards[shard_idx];
        if shard.contains(hash, &key) {
            return Ok(false);
        }
        let heap = key.heap_bytes();
        shard.push_unique(hash, key)?;
        self.size += 1;
        self.key_heap_bytes += heap;
        Ok(true)
    }

    /// Insert every key, returning how many were new. Stops at the first
    /// allocation failure.
    pub fn insert_all(&mut self, keys: impl IntoIterator<Item = K>) -> Result<usize> {
        let mut inserted = 0;
        for key in keys {
            if self.insert(key)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Split into `NUM_SHARDS` shards. No-op when already two-level. Every
    /// shard is sized before any key moves, so a failure leaves the set
    /// single-level and intact.
    pub fn convert_to_two_level(&mut self) -> Result<()> {
        if self.is_two_level() {
            return Ok(());
        }
        let mut hashes: Vec<u64> = Vec::new();
        hashes.try_reserve_exact(self.size)?;
        let mut counts = [0usize; NUM_SHARDS];
        for key in &self.shards[0].keys {
            let hash = self.hash_of(key);
            counts[shard_index(hash)] += 1;
            hashes.push(hash);
        }

        let mut shards: Vec<Shard<K>> = Vec::new();
        shards.try_reserve_exact(NUM_SHARDS)?;
        for count in counts {
            let capacity = bucket_capacity(count);
            let mut shard = Shard {
                table: HashTable::new(),
                keys: Vec::new(),
            };
            shard.keys.try_reserve_exact(capacity)?;
            shard.table.try_reserve(capacity, |e: &KeyEntry| e.hash)?;
            shards.push(shard);
        }

        let old = std::mem::replace(&mut self.shards, shards);
        let keys = old.into_iter().flat_map(|shard| shard.keys);
        for (key, hash) in keys.zip(hashes) {
            let shard = &mut self.shards[shard_index(hash)];
            let index = shard.keys.len();
            shard.keys.push(key);
            shard
                .table
                .insert_unique(hash, KeyEntry { index, hash }, |e| e.hash);
        }
        Ok(())
    }

    pub fn begin(&self) -> HashSetCursor {
        let mut cursor = HashSetCursor::default();
        self.skip_exhausted_shards(&mut cursor);
        cursor
    }

    pub fn is_end(&self, cursor: &HashSetCursor) -> bool {
        cursor.shard >= self.shards.len()
    }

    fn skip_exhausted_shards(&self, cursor: &mut HashSetCursor) {
        while cursor.shard < self.shards.len() && cursor.index >= self.shards[cursor.shard].keys.len()
        {
            cursor.shard += 1;
            cursor.index = 0;
        }
    }

    /// Advance `cursor` over at most `max` keys, handing each to `f`.
    pub fn next_batch<'a>(
        &'a self,
        cursor: &mut HashSetCursor,
        max: usize,
        mut f: impl FnMut(&'a K),
    ) -> usize {
        let mut emitted = 0;
        while emitted < max && !self.is_end(cursor) {
            let keys = &self.shards[cursor.shard].keys;
            let take = (keys.len() - cursor.index).min(max - emitted);
            for key in &keys[cursor.index..cursor.index + take] {
                f(key);
            }
            cursor.index += take;
            emitted += take;
            self.skip_exhausted_shards(cursor);
        }
        emitted
    }

    /// Bytes reserved by tables, key vectors and key heap storage.
    pub fn memory_usage(&self) -> usize {
        self.shards.iter().map(Shard::memory_usage).sum::<usize>() + self.key_heap_bytes
    }
}

fn shard_index(hash: u64) -> usize {
    bit_util::trailing_bits(
        bit_util::shift_right_zero_on_overflow(hash, SHARD_BITS_OFFSET),
        SHARD_BITS,
    ) as usize
}

fn bucket_capacity(requested: usize) -> usize {
    let requested = i64::try_from(requested.max(1)).unwrap_or(i64::MAX >> 1);
    usize::try_from(bit_util::next_power_of_two(requested)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::hash_table::hash::{DEFAULT_HASH_SEED, hash_u64_with_seed};

    #[derive(Debug, PartialEq, Eq)]
    struct TestKey(u64);

    impl DistinctKey for TestKey {
        fn hash_with_seed(&self, seed: u64) -> u64 {
            hash_u64_with_seed(seed, self.0)
        }
    }

    fn drain(set: &DistinctHashSet<TestKey>, batch: usize) -> Vec<u64> {
        let mut cursor = set.begin();
        let mut out = Vec::new();
        while !set.is_end(&cursor) {
            let n = set.next_batch(&mut cursor, batch, |k| out.push(k.0));
            assert!(n <= batch);
        }
        out
    }

    #[test]
    fn duplicates_are_absorbed() {
        let mut set = DistinctHashSet::with_capacity(4, DEFAULT_HASH_SEED);
        let new = set
            .insert_all([1, 2, 2, 3, 1, 3, 3].into_iter().map(TestKey))
            .expect("insert");
        assert_eq!(new, 3);
        assert_eq!(set.len(), 3);
        assert_eq!(drain(&set, 2), vec![1, 2, 3]);
        assert!(set.contains(&TestKey(2)));
        assert!(!set.contains(&TestKey(4)));
    }

    #[test]
    fn promotion_preserves_membership() {
        let mut set = DistinctHashSet::with_capacity(1, DEFAULT_HASH_SEED);
        set.insert_all((0..1000).map(TestKey)).expect("insert");
        let before = set.memory_usage();
        set.convert_to_two_level().expect("promote");
        assert!(set.is_two_level());
        assert_eq!(set.len(), 1000);
        assert!(set.memory_usage() > 0 && before > 0);

        // idempotent
        set.convert_to_two_level().expect("promote again");
        assert_eq!(set.len(), 1000);

        // inserts after promotion land in the right shard
        assert_eq!(set.insert_all((500..1500).map(TestKey)).expect("insert"), 500);
        let mut seen = drain(&set, 7);
        assert_eq!(seen.len(), 1500);
        seen.sort_unstable();
        assert_eq!(seen, (0..1500).collect::<Vec<_>>());
        assert!((0..1500).all(|v| set.contains(&TestKey(v))));
    }

    #[test]
    fn empty_set_cursor_is_at_end() {
        let set: DistinctHashSet<TestKey> = DistinctHashSet::with_capacity(0, DEFAULT_HASH_SEED);
        let cursor = set.begin();
        assert!(set.is_end(&cursor));
        assert!(set.is_empty());
    }

    #[test]
    fn two_level_empty_shards_are_skipped() {
        let mut set = DistinctHashSet::with_capacity(8, DEFAULT_HASH_SEED);
        set.convert_to_two_level().expect("promote");
        set.insert(TestKey(42)).expect("insert");
        assert_eq!(drain(&set, 16), vec![42]);
    }

    #[test]
    fn shard_ignores_top_hash_bits() {
        let low = 0x0000_0007_1234_5678u64;
        assert_eq!(shard_index(low), 7);
        assert_eq!(shard_index(low | 0xFE00_0000_0000_0000), 7);
        assert_eq!(shard_index(u64::MAX), NUM_SHARDS - 1);
        assert_eq!(shard_index(0xFFFF_FFF0_FFFF_FFFF), 0);
    }

    #[test]
    fn promoted_keys_spread_over_shards() {
        let mut set = DistinctHashSet::with_capacity(1, DEFAULT_HASH_SEED);
        set.insert_all((0..4096).map(TestKey)).expect("insert");
        set.convert_to_two_level().expect("promote");
        let used = set.shards.iter().filter(|s| !s.keys.is_empty()).count();
        assert_eq!(used, NUM_SHARDS);
        assert_eq!(set.len(), 4096);
    }

    #[test]
    fn bucket_capacity_is_power_of_two() {
        assert_eq!(bucket_capacity(0), 1);
        assert_eq!(bucket_capacity(5), 8);
        assert_eq!(bucket_capacity(256), 256);
    }
}
