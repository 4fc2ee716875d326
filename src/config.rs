//! Run configuration: an optional YAML file with every field defaulted, then
//! environment overrides. The defaults reproduce the production tuning.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_ENV: &str = "CARDEX_CONFIG";
pub const DEFAULT_OUT_DIR: &str = "public";
pub const DEFAULT_UNIVERSE_PATH: &str = "data/pokedex.json";
pub const DEFAULT_PRICECHARTING_MAP: &str = "data/pricecharting-map.json";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_API_BASE: &str = "https://api.pokemontcg.io/v2/cards";
pub const DEFAULT_SPECIES_BASE: &str = "https://pokeapi.co/api/v2/pokemon-species";
pub const MAX_PAGE_SIZE: u32 = 250;

/// Generation boundaries of the national dex; one broad query per range.
pub const DEFAULT_DEX_RANGES: &[(u32, u32)] = &[
    (1, 151),
    (152, 251),
    (252, 386),
    (387, 493),
    (494, 649),
    (650, 721),
    (722, 809),
    (810, 905),
    (906, 1025),
];

/// Names that broad range queries historically under-count: paradox forms,
/// mask forms, and names with punctuation the upstream tokenizer splits.
pub const DEFAULT_SPARSE_NAMES: &[&str] = &[
    "Great Tusk",
    "Scream Tail",
    "Brute Bonnet",
    "Flutter Mane",
    "Slither Wing",
    "Sandy Shocks",
    "Roaring Moon",
    "Walking Wake",
    "Raging Bolt",
    "Gouging Fire",
    "Iron Treads",
    "Iron Bundle",
    "Iron Hands",
    "Iron Jugulis",
    "Iron Moth",
    "Iron Thorns",
    "Iron Valiant",
    "Iron Leaves",
    "Iron Crown",
    "Iron Boulder",
    "Ogerpon",
    "Ogerpon (Teal Mask)",
    "Ogerpon (Hearthflame Mask)",
    "Ogerpon (Wellspring Mask)",
    "Ogerpon (Cornerstone Mask)",
    "Mr. Mime",
    "Mr. Rime",
    "Mime Jr.",
    "Farfetch'd",
    "Sirfetch'd",
    "Ho-Oh",
    "Type: Null",
    "Jangmo-o",
    "Hakamo-o",
    "Kommo-o",
    "Porygon-Z",
];

/// Dex ids that broad range queries routinely come back short on.
pub const DEFAULT_SPARSE_DEX: &[u32] = &[
    29, 32, 83, 122, 439, 669, 772, 785, 786, 787, 788, 865, 866, 984, 985, 986, 987, 988, 989,
    990, 991, 992, 993, 994, 995, 1005, 1006, 1009, 1010, 1020, 1021, 1022, 1023,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            base_delay_ms: 900,
            jitter_ms: 300,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests and offline tooling.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub user_agent: String,
    pub page_size: u32,
    /// Hard ceiling on pages per query; guards against upstream miscounting.
    pub max_pages: u32,
    pub page_pause_ms: u64,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            user_agent: format!("cardex/{} (+static card index)", env!("CARGO_PKG_VERSION")),
            page_size: MAX_PAGE_SIZE,
            max_pages: 140,
            page_pause_ms: 120,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillPolicy {
    /// Keys at or above this dex number are backfilled when sparse.
    pub from_dex: u32,
    /// "Sparse" means fewer accumulated records than this.
    pub min_records: usize,
    /// Names that are always backfilled regardless of count.
    pub sparse_names: BTreeSet<String>,
    /// Dex ids that are always backfilled, with a dex query on top of the name query.
    pub sparse_dex: BTreeSet<u32>,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            from_dex: 906,
            min_records: 6,
            sparse_names: DEFAULT_SPARSE_NAMES.iter().map(|s| s.to_string()).collect(),
            sparse_dex: DEFAULT_SPARSE_DEX.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ranges: Vec<(u32, u32)>,
    pub broad_concurrency: usize,
    pub backfill_concurrency: usize,
    /// A failing range wider than this is split at its midpoint.
    pub min_split_span: u32,
    /// Optional cap on halvings; unset means split until `min_split_span`.
    pub max_split_depth: Option<u32>,
    pub range_pause_ms: u64,
    pub query_pause_ms: u64,
    pub backfill: BackfillPolicy,
    /// Name backfills for these keys become an OR query over the listed names.
    pub name_variants: BTreeMap<String, Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut name_variants = BTreeMap::new();
        name_variants.insert(
            "Ogerpon".to_string(),
            [
                "Ogerpon",
                "Ogerpon ex",
                "Ogerpon (Teal Mask)",
                "Ogerpon (Hearthflame Mask)",
                "Ogerpon (Wellspring Mask)",
                "Ogerpon (Cornerstone Mask)",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        );
        Self {
            ranges: DEFAULT_DEX_RANGES.to_vec(),
            broad_concurrency: 3,
            backfill_concurrency: 3,
            min_split_span: 10,
            max_split_depth: None,
            range_pause_ms: 400,
            query_pause_ms: 120,
            backfill: BackfillPolicy::default(),
            name_variants,
        }
    }
}

impl EngineConfig {
    pub fn range_pause(&self) -> Duration {
        Duration::from_millis(self.range_pause_ms)
    }

    pub fn query_pause(&self) -> Duration {
        Duration::from_millis(self.query_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub max_checks: usize,
    pub concurrency: usize,
    /// Keys persisted with fewer records than this are always checked.
    pub low_count: usize,
    pub query_pause_ms: u64,
    pub retry: RetryPolicy,
    /// Audit the in-memory catalog right after `fetch` persists it.
    pub after_fetch: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_checks: 300,
            concurrency: 5,
            low_count: 3,
            query_pause_ms: 100,
            after_fetch: false,
            retry: RetryPolicy {
                max_retries: 5,
                base_delay_ms: 600,
                jitter_ms: 250,
            },
        }
    }
}

impl VerifyConfig {
    pub fn query_pause(&self) -> Duration {
        Duration::from_millis(self.query_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub retain_days: i64,
    pub pricecharting: PricechartingConfig,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            retain_days: 400,
            pricecharting: PricechartingConfig::default(),
        }
    }
}

/// Optional quote proxy. Snapshots are only taken when both `endpoint` and
/// `api_key` are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricechartingConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// `{ "<card id>": "<product id>" }`; cards without an entry are not quoted.
    pub map_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for PricechartingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            map_path: PathBuf::from(DEFAULT_PRICECHARTING_MAP),
            timeout_secs: 20,
        }
    }
}

impl PricechartingConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let endpoint = self.endpoint.as_deref().filter(|v| !v.trim().is_empty())?;
        let key = self.api_key.as_deref().filter(|v| !v.trim().is_empty())?;
        Some((endpoint, key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesConfig {
    pub base_url: String,
    pub max_id: u32,
    pub concurrency: usize,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SPECIES_BASE.to_string(),
            max_id: 1025,
            concurrency: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub out_dir: PathBuf,
    pub universe_path: PathBuf,
    pub bind_addr: String,
    pub upstream: UpstreamConfig,
    pub engine: EngineConfig,
    pub verify: VerifyConfig,
    pub prices: PriceConfig,
    pub species: SpeciesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            universe_path: PathBuf::from(DEFAULT_UNIVERSE_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            upstream: UpstreamConfig::default(),
            engine: EngineConfig::default(),
            verify: VerifyConfig::default(),
            prices: PriceConfig::default(),
            species: SpeciesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (or defaults when `None`), apply process environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate(path.unwrap_or(Path::new("<defaults>")))?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path).map_err(|err| PipelineError::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|message| PipelineError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| err.to_string())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("POKEMONTCG_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.upstream.api_key = Some(key.trim().to_string());
        }
        if let Some(dir) = lookup("CARDEX_OUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.out_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("CARDEX_UNIVERSE").filter(|v| !v.trim().is_empty()) {
            self.universe_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("CARDEX_BIND").filter(|v| !v.trim().is_empty()) {
            self.bind_addr = bind;
        }
        if let Some(key) = lookup("PRICECHARTING_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.prices.pricecharting.api_key = Some(key.trim().to_string());
        }
        if let Some(endpoint) = lookup("PRICECHARTING_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            self.prices.pricecharting.endpoint = Some(endpoint.trim().to_string());
        }
    }

    /// Rejects settings that would stall a run; clamps page size to what the upstream accepts.
    pub fn validate(&mut self, source: &Path) -> Result<(), PipelineError> {
        let fail = |message: String| PipelineError::Config {
            path: source.to_path_buf(),
            message,
        };

        self.upstream.page_size = self.upstream.page_size.clamp(1, MAX_PAGE_SIZE);
        if self.upstream.max_pages == 0 {
            return Err(fail("upstream.max_pages must be at least 1".to_string()));
        }
        if self.engine.broad_concurrency == 0 || self.engine.backfill_concurrency == 0 {
            return Err(fail("engine concurrency must be at least 1".to_string()));
        }
        if self.engine.min_split_span == 0 {
            return Err(fail("engine.min_split_span must be at least 1".to_string()));
        }
        if let Some((start, end)) = self.engine.ranges.iter().find(|(s, e)| s > e) {
            return Err(fail(format!("engine.ranges contains inverted range [{start}, {end}]")));
        }
        if self.verify.concurrency == 0 || self.species.concurrency == 0 {
            return Err(fail("verify/species concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
