//! Shape detection for upstream and persisted payloads.
//!
//! The search endpoint wraps records as `{ data: [...], totalCount }`; persisted
//! artifacts are bare arrays; older exports used `{ cards: [...] }`. All three
//! are accepted here and nowhere else.

use serde_json::Value;

pub type RawRecord = Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Array(Vec<RawRecord>),
    Wrapped {
        records: Vec<RawRecord>,
        total_count: Option<u64>,
    },
    Invalid,
}

impl Envelope {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn total_count(&self) -> Option<u64> {
        match self {
            Self::Wrapped { total_count, .. } => *total_count,
            _ => None,
        }
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            Self::Array(records) | Self::Wrapped { records, .. } => records,
            Self::Invalid => Vec::new(),
        }
    }
}

pub fn parse_upstream_envelope(json: Value) -> Envelope {
    match json {
        Value::Array(records) => Envelope::Array(records),
        Value::Object(mut object) => {
            let total_count = object.get("totalCount").and_then(Value::as_u64);
            let records = match object.remove("data") {
                Some(Value::Array(records)) => Some(records),
                _ => match object.remove("cards") {
                    Some(Value::Array(records)) => Some(records),
                    _ => None,
                },
            };
            match records {
                Some(records) => Envelope::Wrapped {
                    records,
                    total_count,
                },
                None => Envelope::Invalid,
            }
        }
        _ => Envelope::Invalid,
    }
}
