//! Query expressions understood by the card search endpoint.

use std::fmt;

/// Inclusive numeric range of dex identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexRange {
    pub start: u32,
    pub end: u32,
}

impl DexRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of identifiers covered, saturating at `u32::MAX`.
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Halves at the midpoint; `None` for a single identifier.
    pub fn split(&self) -> Option<(DexRange, DexRange)> {
        if self.start >= self.end {
            return None;
        }
        let mid = self.start + (self.end - self.start) / 2;
        Some((DexRange::new(self.start, mid), DexRange::new(mid + 1, self.end)))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl From<(u32, u32)> for DexRange {
    fn from((start, end): (u32, u32)) -> Self {
        Self::new(start, end)
    }
}

impl fmt::Display for DexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardQuery {
    DexRange(DexRange),
    Dex(u32),
    Name(String),
    /// Exact-phrase name predicates joined with OR.
    AnyName(Vec<String>),
}

impl CardQuery {
    /// Name query, widened to an OR-group when `variants` lists alternative spellings.
    pub fn for_name(name: &str, variants: Option<&Vec<String>>) -> Self {
        match variants {
            Some(variants) if !variants.is_empty() => Self::AnyName(variants.clone()),
            _ => Self::Name(name.to_string()),
        }
    }

    pub fn expression(&self) -> String {
        match self {
            Self::DexRange(range) => {
                format!("nationalPokedexNumbers:[{} TO {}]", range.start, range.end)
            }
            Self::Dex(dex) => format!("nationalPokedexNumbers:{dex}"),
            Self::Name(name) => name_predicate(name),
            Self::AnyName(names) => {
                let joined = names
                    .iter()
                    .map(|name| name_predicate(name))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                format!("({joined})")
            }
        }
    }
}

impl fmt::Display for CardQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

fn name_predicate(name: &str) -> String {
    format!("name:\"{}\"", name.replace('"', "\\\""))
}
