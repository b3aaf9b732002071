// Open-addressed probing table (C8): one reserved "empty" slot state per
// array entry, linear probing on collision, doubles on load factor.
// Grounded on `thrill/core/reduce_by_hash_post_stage.hpp`'s `ReduceTable`
// instantiated with `ProbingHashTable` semantics from
// `reduce_probing_hash_table.hpp`.
//
// `thrill`'s probing table reserves a sentinel key value to mark empty
// slots so it can use a flat array of `TableItem` with no per-slot
// discriminant. This implementation uses `Vec<Option<(K, V)>>` instead: a
// real sentinel key is unavailable for an arbitrary user `K`, and `Option`
// costs one discriminant byte per slot rather than requiring the caller to
// supply a reserved key. Documented in DESIGN.md.

use crate::reduce::table::hash_with_salt;
use std::hash::Hash;

pub struct ProbingTable<K, V> {
    slots: Vec<Option<(K, V)>>,
    len: usize,
    salt: u64,
    max_load_factor: f64,
}

impl<K: Eq + Hash + Clone, V: Clone> ProbingTable<K, V> {
    pub fn new(initial_capacity: usize, salt: u64, max_load_factor: f64) -> Self {
        let capacity = initial_capacity.max(4);
        ProbingTable {
            slots: vec![None; capacity],
            len: 0,
            salt,
            max_load_factor,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.slots.len() as f64
    }

    /// Inserts `(key, value)`, folding with an existing entry for the same
    /// key via `reduce_fn(existing, value)`. Grows (doubling capacity) if
    /// the load factor would cross `max_load_factor` after insertion.
    pub fn insert_or_reduce(&mut self, key: K, value: V, reduce_fn: &dyn Fn(V, V) -> V) {
        if self.probe_and_apply(&key, &value, reduce_fn) {
            return;
        }
        self.len += 1;
        if self.load_factor() > self.max_load_factor {
            self.grow();
        }
        self.probe_and_apply(&key, &value, reduce_fn);
    }

    /// Probes for `key`; if found, folds the existing value with `value`
    /// and returns true. If an empty slot is reached first, inserts
    /// `(key, value)` there and returns false (caller bumps `len`).
    fn probe_and_apply(&mut self, key: &K, value: &V, reduce_fn: &dyn Fn(V, V) -> V) -> bool {
        let capacity = self.slots.len();
        let start = (hash_with_salt(key, self.salt) % capacity as u64) as usize;
        for offset in 0..capacity {
            let idx = (start + offset) % capacity;
            match &mut self.slots[idx] {
                Some((existing_key, existing_value)) if existing_key == key => {
                    let folded = reduce_fn(existing_value.clone(), value.clone());
                    *existing_value = folded;
                    return true;
                }
                None => {
                    self.slots[idx] = Some((key.clone(), value.clone()));
                    return false;
                }
                _ => continue,
            }
        }
        unreachable!("probing table grew past 1.0 load factor without resizing")
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![None; new_capacity]);
        self.len = 0;
        for entry in old.into_iter().flatten() {
            let (key, value) = entry;
            self.len += 1;
            let capacity = self.slots.len();
            let start = (hash_with_salt(&key, self.salt) % capacity as u64) as usize;
            for offset in 0..capacity {
                let idx = (start + offset) % capacity;
                if self.slots[idx].is_none() {
                    self.slots[idx] = Some((key, value));
                    break;
                }
            }
        }
    }

    /// Drains every entry, in arbitrary slot order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let capacity = self.slots.len().max(4);
        let old = std::mem::replace(&mut self.slots, vec![None; capacity]);
        self.len = 0;
        old.into_iter().flatten().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }
}
