//! Flat window maps keyed by sequence number.
//!
//! A window rarely holds more than a handful of live entries, so a flat
//! vector of pairs beats hashing or tree traversal on locality alone.
//! Because keys wrap, any ordered view is taken relative to a window base
//! through an [`SnSpace`].

use crate::sn::{Sn, SnSpace};

#[derive(Debug, Default)]
pub struct SnMap<V> {
    entries: Vec<(Sn, V)>,
}

impl<V> SnMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, sn: Sn) -> bool {
        self.entries.iter().any(|(k, _)| *k == sn)
    }

    pub fn get(&self, sn: Sn) -> Option<&V> {
        self.entries.iter().find(|(k, _)| *k == sn).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, sn: Sn) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| *k == sn)
            .map(|(_, v)| v)
    }

    /// Inserts or replaces the entry for `sn`, returning the old value.
    pub fn insert(&mut self, sn: Sn, value: V) -> Option<V> {
        if let Some((_, v)) = self.entries.iter_mut().find(|(k, _)| *k == sn) {
            Some(std::mem::replace(v, value))
        } else {
            self.entries.push((sn, value));
            None
        }
    }

    pub fn remove(&mut self, sn: Sn) -> Option<V> {
        let idx = self.entries.iter().position(|(k, _)| *k == sn)?;
        Some(self.entries.swap_remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sn, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(Sn, &mut V) -> bool,
    {
        self.entries.retain_mut(|(k, v)| f(*k, v));
    }

    /// Keys ordered by distance from `base`, nearest first.
    pub fn keys_sorted(&self, space: &SnSpace, base: Sn) -> Vec<Sn> {
        let mut keys: Vec<Sn> = self.entries.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable_by_key(|sn| space.distance(base, *sn));
        keys
    }

    /// The entry farthest from `base` in modular order.
    pub fn max_key(&self, space: &SnSpace, base: Sn) -> Option<Sn> {
        self.entries
            .iter()
            .map(|(k, _)| *k)
            .max_by_key(|sn| space.distance(base, *sn))
    }
}
