//! Catalog universe: the closed set of expected keys and the dex table used
//! to route records.
//!
//! Two file shapes are accepted: `{ "Bulbasaur": 1 }` (name to number) and
//! `{ "0001": "Bulbasaur" }` (padded number to name).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::config::{RetryPolicy, SpeciesConfig};
use crate::data::key::Key;
use crate::error::{PipelineError, UpstreamError};
use crate::reconcile::pool::WorkerPool;
use crate::upstream::backoff::fetch_with_retry;
use crate::upstream::client::classify_status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseEntry {
    pub name: String,
    pub dex: u32,
}

impl UniverseEntry {
    pub fn new(name: impl Into<String>, dex: u32) -> Self {
        Self {
            name: name.into(),
            dex,
        }
    }

    pub fn keys(&self) -> [Key; 2] {
        [Key::Dex(self.dex), Key::Name(self.name.clone())]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Universe {
    entries: Vec<UniverseEntry>,
    by_dex: HashMap<u32, usize>,
    names: HashSet<String>,
}

impl Universe {
    /// Entries are ordered by dex; a repeated dex or name keeps its first entry.
    pub fn from_entries(entries: impl IntoIterator<Item = UniverseEntry>) -> Self {
        let mut sorted: Vec<UniverseEntry> = entries.into_iter().collect();
        sorted.sort_by(|a, b| a.dex.cmp(&b.dex).then_with(|| a.name.cmp(&b.name)));

        let mut universe = Universe::default();
        for entry in sorted {
            if universe.by_dex.contains_key(&entry.dex) || universe.names.contains(&entry.name)
            {
                tracing::warn!(name = %entry.name, dex = entry.dex, "duplicate universe entry ignored");
                continue;
            }
            let index = universe.entries.len();
            universe.by_dex.insert(entry.dex, index);
            universe.names.insert(entry.name.clone());
            universe.entries.push(entry);
        }
        universe
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let fail = |message: String| PipelineError::Universe {
            path: path.to_path_buf(),
            message,
        };
        let raw = fs::read_to_string(path).map_err(|err| fail(err.to_string()))?;
        let json: Value = serde_json::from_str(&raw).map_err(|err| fail(err.to_string()))?;
        let Value::Object(object) = json else {
            return Err(fail("expected a JSON object".to_string()));
        };
        let universe = Self::from_json_object(&object).map_err(fail)?;
        if universe.is_empty() {
            return Err(fail("universe contains no entries".to_string()));
        }
        Ok(universe)
    }

    pub fn from_json_object(object: &Map<String, Value>) -> Result<Self, String> {
        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            let entry = match value {
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(|dex| UniverseEntry::new(key.clone(), dex)),
                Value::String(name) => key
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .map(|dex| UniverseEntry::new(name.clone(), dex)),
                _ => None,
            };
            match entry {
                Some(entry) if !entry.name.trim().is_empty() => entries.push(entry),
                _ => return Err(format!("unusable universe entry '{key}': {value}")),
            }
        }
        Ok(Self::from_entries(entries))
    }

    /// Pretty `{ "<name>": <dex>, ... }` in dex order, newline-terminated.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)
    }

    pub fn entries(&self) -> &[UniverseEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_dex(&self, dex: u32) -> Option<&UniverseEntry> {
        self.by_dex.get(&dex).map(|&i| &self.entries[i])
    }

    /// Every expected key: one dex key and one name key per entry.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().flat_map(UniverseEntry::keys)
    }

    pub fn dex_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().map(|entry| Key::Dex(entry.dex))
    }
}

/// Serializes as the name-to-dex object the loader accepts, in dex order.
impl Serialize for Universe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, &entry.dex)?;
        }
        map.end()
    }
}

/// English display name of a species payload; falls back to the title-cased slug.
pub fn english_name(species: &Value) -> Option<String> {
    let english = species
        .get("names")
        .and_then(Value::as_array)
        .and_then(|names| {
            names.iter().find(|n| {
                n.get("language")
                    .and_then(|l| l.get("name"))
                    .and_then(Value::as_str)
                    == Some("en")
            })
        })
        .and_then(|n| n.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty());
    if let Some(name) = english {
        return Some(name.to_string());
    }

    let slug = species.get("name").and_then(Value::as_str)?;
    let titled = slug
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    (!titled.trim().is_empty()).then_some(titled)
}

/// Builds the universe from the species API: ids `1..=max_id`, bounded pool.
/// Species that fail after retries are logged and left out.
pub async fn fetch_species_universe(
    config: &SpeciesConfig,
    user_agent: &str,
    retry: &RetryPolicy,
) -> Result<Universe, reqwest::Error> {
    let http = reqwest::Client::builder()
        .user_agent(user_agent.to_string())
        .timeout(Duration::from_secs(30))
        .build()?;
    let base = config.base_url.trim_end_matches('/').to_string();
    let ids: Vec<u32> = (1..=config.max_id).collect();

    let http = &http;
    let base = base.as_str();
    let pool = WorkerPool::with_workers(config.concurrency);
    let results = pool
        .run(&ids, move |&id| {
            let url = format!("{base}/{id}/");
            async move {
                let fetched = fetch_with_retry(retry, &url, || fetch_species(http, &url)).await;
                match fetched.map(|species| english_name(&species)) {
                    Ok(Some(name)) => {
                        tracing::info!(dex = id, name = %name, "species resolved");
                        Some(UniverseEntry::new(name, id))
                    }
                    Ok(None) => {
                        tracing::warn!(dex = id, "species payload has no usable name");
                        None
                    }
                    Err(err) => {
                        tracing::error!(dex = id, error = %err, "species fetch failed");
                        None
                    }
                }
            }
        })
        .await;

    Ok(Universe::from_entries(results.into_iter().flatten()))
}

async fn fetch_species(http: &reqwest::Client, url: &str) -> Result<Value, UpstreamError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| UpstreamError::transient(None, err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status.as_u16()));
    }
    response
        .json::<Value>()
        .await
        .map_err(|err| UpstreamError::transient(Some(status.as_u16()), err.to_string()))
}
