//! Normalized card record: the keys the reconciler needs plus the allow-listed
//! payload that is persisted verbatim.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::upstream::RawRecord;

/// Width the sequence number is left-padded to before comparison.
pub const SEQUENCE_PAD_WIDTH: usize = 4;

/// Array fields that carry dex numbers, current and legacy spellings.
const DEX_ARRAY_FIELDS: &[&[&str]] = &[
    &["nationalPokedexNumbers"],
    &["_raw", "nationalPokedexNumbers"],
    &["pokedexNumbers"],
    &["_raw", "pokedexNumbers"],
];
const DEX_SCALAR_FIELDS: &[&str] = &["dexId", "dex"];

const RELEASE_DATE_FIELDS: &[&[&str]] = &[
    &["set", "releaseDate"],
    &["_raw", "set", "releaseDate"],
    &["releaseDate"],
];

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stable upstream id; empty when the raw record had none.
    pub id: String,
    pub display_name: String,
    pub numeric_keys: BTreeSet<u32>,
    /// `None` sorts as the oldest possible release.
    pub release_date: Option<NaiveDate>,
    pub sequence_number: String,
    pub payload: Map<String, Value>,
}

impl Record {
    /// Records without an id never enter a bucket.
    pub fn is_identified(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn padded_sequence(&self) -> String {
        format!("{:0>width$}", self.sequence_number, width = SEQUENCE_PAD_WIDTH)
    }
}

/// Persisted form is the payload alone.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

/// Never fails: malformed fields are dropped, absent fields are omitted.
pub fn normalize(raw: &RawRecord) -> Record {
    let id = raw
        .get("id")
        .and_then(scalar_to_string)
        .map(|id| id.trim().to_string())
        .unwrap_or_default();
    let display_name = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let sequence_number = raw
        .get("number")
        .and_then(scalar_to_string)
        .unwrap_or_default();

    Record {
        id,
        display_name,
        numeric_keys: extract_numeric_keys(raw),
        release_date: extract_release_date(raw),
        sequence_number,
        payload: slim_payload(raw),
    }
}

pub fn extract_numeric_keys(raw: &RawRecord) -> BTreeSet<u32> {
    let mut keys = BTreeSet::new();
    for path in DEX_ARRAY_FIELDS {
        if let Some(values) = lookup(raw, path).and_then(Value::as_array) {
            keys.extend(values.iter().filter_map(coerce_dex));
        }
    }
    for field in DEX_SCALAR_FIELDS {
        if let Some(dex) = raw.get(*field).and_then(coerce_dex) {
            keys.insert(dex);
        }
    }
    keys
}

pub fn extract_release_date(raw: &RawRecord) -> Option<NaiveDate> {
    RELEASE_DATE_FIELDS
        .iter()
        .filter_map(|path| lookup(raw, path).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .and_then(parse_release_date)
}

/// Upstream uses `1999/01/09`; older exports use ISO dashes.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%Y-%m-%d"))
        .ok()
}

fn coerce_dex(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lookup<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |node, key| node.get(*key))
}

fn slim_payload(raw: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    copy_field(raw, &mut out, "id");
    copy_field(raw, &mut out, "name");
    copy_subset(raw, &mut out, "images", &["small", "large"]);
    copy_subset(raw, &mut out, "set", &["name", "series", "releaseDate"]);
    copy_field(raw, &mut out, "number");
    copy_field(raw, &mut out, "rarity");
    copy_field(raw, &mut out, "subtypes");
    copy_field(raw, &mut out, "nationalPokedexNumbers");
    copy_subset(raw, &mut out, "tcgplayer", &["prices"]);
    copy_subset(raw, &mut out, "cardmarket", &["prices"]);
    out
}

fn copy_field(raw: &Value, out: &mut Map<String, Value>, field: &str) {
    if let Some(value) = raw.get(field) {
        out.insert(field.to_string(), value.clone());
    }
}

fn copy_subset(raw: &Value, out: &mut Map<String, Value>, field: &str, keys: &[&str]) {
    let Some(object) = raw.get(field).and_then(Value::as_object) else {
        return;
    };
    let subset = keys
        .iter()
        .filter_map(|key| object.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect::<Map<_, _>>();
    out.insert(field.to_string(), Value::Object(subset));
}
