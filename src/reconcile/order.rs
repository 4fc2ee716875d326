//! Bucket finalization: id dedup and the deterministic bucket order.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::data::record::Record;

/// Newest release first, then sequence number descending (zero-padded,
/// lexicographic), then id ascending. Missing release dates sort last.
pub fn compare_records(a: &Record, b: &Record) -> Ordering {
    b.release_date
        .cmp(&a.release_date)
        .then_with(|| b.padded_sequence().cmp(&a.padded_sequence()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Keeps the first record seen for each id, in arrival order.
pub fn dedupe_by_id(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| record.is_identified() && seen.insert(record.id.clone()))
        .collect()
}

pub fn finalize_bucket(records: Vec<Record>) -> Vec<Record> {
    let mut bucket = dedupe_by_id(records);
    bucket.sort_by(compare_records);
    bucket
}
