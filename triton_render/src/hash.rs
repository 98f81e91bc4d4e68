//! Stable 64-bit hash mix used for every hash-keyed table in the graph
//! (group names, render-pass names/types, framebuffer-cache keys). Mirrors
//! `triton_vulkan`'s internal cache hash exactly so the two layers agree on
//! what "the same key" means, without `triton_render` reaching into
//! `triton_vulkan`'s private cache module.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Default)]
pub struct KeyHasher {
    state: u64,
}

impl KeyHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    pub fn write(&mut self, value: impl Hash) {
        let mut hasher = FnvStep {
            state: self.state,
            rotate: (self.state.count_ones() % 61) as u32,
        };
        value.hash(&mut hasher);
        self.state = hasher.state;
    }

    pub fn finish(self) -> u64 {
        self.state
    }
}

struct FnvStep {
    state: u64,
    rotate: u32,
}

impl Hasher for FnvStep {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(KeyHasher::PRIME);
            self.state = self.state.rotate_left(self.rotate.max(1));
        }
    }
}

pub fn hash_key(value: impl Hash) -> u64 {
    let mut hasher = KeyHasher::new();
    hasher.write(value);
    hasher.finish()
}

/// A `HashMap<u64, T>` with a fetch-or-build entry point, used by the
/// framebuffer cache.
pub struct Cache<T> {
    entries: HashMap<u64, T>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> Cache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: u64) -> Option<&T>
    where
        T: Copy,
    {
        self.entries.get(&key).copied()
    }

    pub fn fetch_or_build<E>(&mut self, key: u64, build: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        T: Copy,
    {
        if !self.entries.contains_key(&key) {
            let value = build()?;
            self.entries.insert(key, value);
        }
        Ok(*self.entries.get(&key).unwrap())
    }

    pub fn remove(&mut self, key: u64) -> Option<T> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fields_same_hash() {
        let a = hash_key((1u32, "group", 4u32));
        let b = hash_key((1u32, "group", 4u32));
        assert_eq!(a, b);
    }

    #[test]
    fn different_fields_different_hash() {
        let a = hash_key("group-a");
        let b = hash_key("group-b");
        assert_ne!(a, b);
    }

    #[test]
    fn fetch_or_build_only_builds_once() {
        let mut cache: Cache<u32> = Cache::new();
        let mut builds = 0;
        let key = hash_key("framebuffer-a");

        cache
            .fetch_or_build::<()>(key, || {
                builds += 1;
                Ok(7)
            })
            .unwrap();
        cache
            .fetch_or_build::<()>(key, || {
                builds += 1;
                Ok(7)
            })
            .unwrap();

        assert_eq!(builds, 1);
        assert_eq!(cache.get(key).unwrap(), 7);
    }
}
