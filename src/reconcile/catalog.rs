//! Concurrent bucket store keyed by the closed universe of expected keys.
//!
//! Every expected key gets its own slot up front, so appends from different
//! workers only contend when they hit the same bucket. Keys outside the
//! universe are rejected rather than created.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;

use crate::data::key::Key;
use crate::data::record::Record;
use crate::data::universe::{Universe, UniverseEntry};
use crate::reconcile::order::finalize_bucket;

#[derive(Debug, Default)]
pub struct Catalog {
    slots: HashMap<Key, Mutex<Vec<Record>>>,
}

impl Catalog {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            slots: keys
                .into_iter()
                .map(|key| (key, Mutex::new(Vec::new())))
                .collect(),
        }
    }

    /// One dex slot and one name slot per universe entry.
    pub fn for_universe(universe: &Universe) -> Self {
        Self::new(universe.keys())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.slots.contains_key(key)
    }

    /// Returns false when `key` is not an expected key.
    pub fn append(&self, key: &Key, record: Record) -> bool {
        match self.slots.get(key) {
            Some(slot) => {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record);
                true
            }
            None => false,
        }
    }

    /// Files `record` under every key it resolves to: each numeric key in the
    /// universe (dex and name encodings), plus both encodings of `target` when
    /// it came from a query aimed at a specific entry. Returns the number of
    /// buckets it landed in; zero means the record matched nothing.
    pub fn route(
        &self,
        universe: &Universe,
        record: &Record,
        target: Option<&UniverseEntry>,
    ) -> usize {
        if !record.is_identified() {
            return 0;
        }
        let mut destinations = BTreeSet::new();
        for dex in &record.numeric_keys {
            if let Some(entry) = universe.by_dex(*dex) {
                destinations.extend(entry.keys());
            }
        }
        if let Some(entry) = target {
            destinations.extend(entry.keys());
        }

        destinations
            .iter()
            .filter(|key| self.append(key, record.clone()))
            .count()
    }

    /// Raw (pre-dedup) size of a bucket.
    pub fn count(&self, key: &Key) -> usize {
        self.slots
            .get(key)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Dedupes and orders every bucket. Empty buckets are kept.
    pub fn finalize(self) -> FinalizedCatalog {
        let buckets = self
            .slots
            .into_par_iter()
            .map(|(key, slot)| {
                let records = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
                (key, finalize_bucket(records))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        FinalizedCatalog { buckets }
    }
}

/// Immutable output of a run, iterated in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedCatalog {
    buckets: BTreeMap<Key, Vec<Record>>,
}

impl FinalizedCatalog {
    pub fn from_buckets(buckets: BTreeMap<Key, Vec<Record>>) -> Self {
        Self { buckets }
    }

    pub fn bucket(&self, key: &Key) -> Option<&[Record]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &[Record])> {
        self.buckets.iter().map(|(key, records)| (key, records.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn counts(&self) -> Vec<(Key, usize)> {
        self.buckets
            .iter()
            .map(|(key, records)| (key.clone(), records.len()))
            .collect()
    }

    pub fn empty_keys(&self) -> Vec<&Key> {
        self.buckets
            .iter()
            .filter(|(_, records)| records.is_empty())
            .map(|(key, _)| key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::normalize;
    use serde_json::json;

    fn universe() -> Universe {
        Universe::from_entries(vec![
            UniverseEntry::new("Bulbasaur", 1),
            UniverseEntry::new("Ivysaur", 2),
        ])
    }

    fn card(id: &str, dex: &[u32]) -> Record {
        normalize(&json!({ "id": id, "nationalPokedexNumbers": dex }))
    }

    #[test]
    fn multi_key_record_lands_in_every_encoding() {
        let u = universe();
        let catalog = Catalog::for_universe(&u);
        assert_eq!(catalog.route(&u, &card("dual", &[1, 2]), None), 4);
        for key in u.keys() {
            assert_eq!(catalog.count(&key), 1, "{key}");
        }
    }

    #[test]
    fn out_of_universe_and_unidentified_are_dropped() {
        let u = universe();
        let catalog = Catalog::for_universe(&u);
        assert_eq!(catalog.route(&u, &card("far", &[999]), None), 0);
        assert_eq!(catalog.route(&u, &card("", &[1]), None), 0);
        assert!(!catalog.append(&Key::Dex(999), card("far", &[999])));
        assert_eq!(catalog.count(&Key::Dex(1)), 0);
    }

    #[test]
    fn targeted_record_joins_target_buckets_without_numeric_key() {
        let u = universe();
        let catalog = Catalog::for_universe(&u);
        let target = u.by_dex(2).cloned();
        assert_eq!(catalog.route(&u, &card("named", &[]), target.as_ref()), 2);
        assert_eq!(catalog.count(&Key::name("Ivysaur")), 1);
        assert_eq!(catalog.count(&Key::Dex(2)), 1);
        assert_eq!(catalog.count(&Key::Dex(1)), 0);
    }

    #[test]
    fn targeted_record_matching_its_own_key_is_not_doubled() {
        let u = universe();
        let catalog = Catalog::for_universe(&u);
        let target = u.by_dex(1).cloned();
        assert_eq!(catalog.route(&u, &card("a", &[1]), target.as_ref()), 2);
        assert_eq!(catalog.count(&Key::Dex(1)), 1);
    }

    #[test]
    fn finalize_keeps_empty_buckets_and_dedupes() {
        let u = universe();
        let catalog = Catalog::for_universe(&u);
        catalog.route(&u, &card("a", &[1]), None);
        catalog.route(&u, &card("a", &[1]), None);
        let done = catalog.finalize();
        assert_eq!(done.len(), 4);
        assert_eq!(done.bucket(&Key::Dex(1)).map(<[Record]>::len), Some(1));
        assert_eq!(done.empty_keys(), vec![&Key::Dex(2), &Key::name("Ivysaur")]);
    }
}
