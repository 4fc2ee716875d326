//! Daily price snapshots per card, kept as a rolling history file.
//!
//! Each run reads the persisted name artifacts and appends at most one
//! snapshot per day and variant to `prices/card/<id>.json`, pruning entries
//! older than the retention window. Cards listed in the PriceCharting product
//! map also get a quote from the configured proxy.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, Utc};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{PriceConfig, PricechartingConfig};
use crate::error::{ArtifactWriteError, PipelineError, UpstreamError};
use crate::index::layout::ArtifactLayout;
use crate::index::reindex::{name_artifacts, read_artifact};
use crate::index::writer::write_artifact;
use crate::upstream::classify_status;

const FINISHES: [&str; 3] = ["normal", "holofoil", "reverseHolofoil"];
const REVERSE: &str = "reverseHolofoil";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcgplayerSnapshot {
    pub d: String,
    pub market: Option<f64>,
    pub low: Option<f64>,
    pub mid: Option<f64>,
    pub high: Option<f64>,
    pub direct_low: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardmarketSnapshot {
    pub d: String,
    pub trend: Option<f64>,
    pub avg7: Option<f64>,
    pub avg30: Option<f64>,
    pub low: Option<f64>,
    pub sales_week: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricechartingSnapshot {
    pub d: String,
    pub price: Option<f64>,
    pub last_sold: Option<String>,
}

trait Dated {
    fn day(&self) -> &str;
}

impl Dated for TcgplayerSnapshot {
    fn day(&self) -> &str {
        &self.d
    }
}

impl Dated for CardmarketSnapshot {
    fn day(&self) -> &str {
        &self.d
    }
}

impl Dated for PricechartingSnapshot {
    fn day(&self) -> &str {
        &self.d
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: String,
    #[serde(default)]
    pub tcgplayer: BTreeMap<String, Vec<TcgplayerSnapshot>>,
    #[serde(default)]
    pub cardmarket: BTreeMap<String, Vec<CardmarketSnapshot>>,
    #[serde(default)]
    pub pricecharting: BTreeMap<String, Vec<PricechartingSnapshot>>,
    /// Sections maintained by other tools are carried through untouched.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl PriceHistory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Adds today's snapshot for every detected variant, then prunes.
    pub fn record(&mut self, card: &Value, today: NaiveDate, retain_days: i64) {
        let day = today.format(DATE_FORMAT).to_string();
        let cutoff = today - Duration::days(retain_days);

        for variant in detect_variants(card) {
            if let Some(snapshot) = pick_tcgplayer(card, variant, &day) {
                push_daily(self.tcgplayer.entry(variant.to_string()).or_default(), snapshot, cutoff);
            }
            if let Some(snapshot) = pick_cardmarket(card, variant, &day) {
                push_daily(self.cardmarket.entry(variant.to_string()).or_default(), snapshot, cutoff);
            }
        }
    }

    /// Adds today's PriceCharting snapshot per finish in `quote`, then prunes.
    pub fn record_pricecharting(&mut self, quote: &Value, today: NaiveDate, retain_days: i64) {
        let day = today.format(DATE_FORMAT).to_string();
        let cutoff = today - Duration::days(retain_days);
        for (finish, snapshot) in pick_pricecharting(quote, &day) {
            push_daily(self.pricecharting.entry(finish.to_string()).or_default(), snapshot, cutoff);
        }
    }
}

fn push_daily<T: Dated>(series: &mut Vec<T>, snapshot: T, cutoff: NaiveDate) {
    if !series.iter().any(|existing| existing.day() == snapshot.day()) {
        series.push(snapshot);
    }
    series.retain(|entry| {
        NaiveDate::parse_from_str(entry.day(), DATE_FORMAT).is_ok_and(|date| date >= cutoff)
    });
}

/// Price variants present on a card; `normal` when none are.
pub fn detect_variants(card: &Value) -> Vec<&'static str> {
    let tcg = card.pointer("/tcgplayer/prices");
    let mut variants: Vec<&'static str> = FINISHES
        .into_iter()
        .filter(|variant| tcg.and_then(|prices| prices.get(*variant)).is_some_and(|v| !v.is_null()))
        .collect();
    let reverse_trend = card
        .pointer("/cardmarket/prices/reverseHoloTrend")
        .is_some_and(|v| !v.is_null());
    if reverse_trend && !variants.contains(&REVERSE) {
        variants.push(REVERSE);
    }
    if variants.is_empty() {
        variants.push("normal");
    }
    variants
}

pub fn pick_tcgplayer(card: &Value, variant: &str, day: &str) -> Option<TcgplayerSnapshot> {
    let prices = card.pointer("/tcgplayer/prices")?.get(variant)?.as_object()?;
    Some(TcgplayerSnapshot {
        d: day.to_string(),
        market: number(prices, "market"),
        low: number(prices, "low"),
        mid: number(prices, "mid"),
        high: number(prices, "high"),
        direct_low: number(prices, "directLow"),
    })
}

/// Cardmarket has one price block per card; the reverse variant reads its own trend.
pub fn pick_cardmarket(card: &Value, variant: &str, day: &str) -> Option<CardmarketSnapshot> {
    let prices = card.pointer("/cardmarket/prices")?.as_object()?;
    let trend = number(prices, "trendPrice");
    Some(CardmarketSnapshot {
        d: day.to_string(),
        trend: if variant == REVERSE {
            number(prices, "reverseHoloTrend").or(trend)
        } else {
            trend
        },
        avg7: number(prices, "avg7"),
        avg30: number(prices, "avg30"),
        low: number(prices, "lowPrice"),
        sales_week: number(prices, "salesPerWeek").or_else(|| number(prices, "weeklySales")),
    })
}

/// A quote with `byFinish` yields one snapshot per listed finish; a flat
/// quote counts as `normal`.
pub fn pick_pricecharting(quote: &Value, day: &str) -> Vec<(&'static str, PricechartingSnapshot)> {
    let snapshot = |node: &Map<String, Value>| PricechartingSnapshot {
        d: day.to_string(),
        price: number(node, "price"),
        last_sold: node.get("lastSold").and_then(Value::as_str).map(str::to_string),
    };
    match quote.get("byFinish").and_then(Value::as_object) {
        Some(by_finish) => FINISHES
            .into_iter()
            .filter_map(|finish| Some((finish, snapshot(by_finish.get(finish)?.as_object()?))))
            .collect(),
        None => quote
            .as_object()
            .map(|node| vec![("normal", snapshot(node))])
            .unwrap_or_default(),
    }
}

fn number(prices: &Map<String, Value>, field: &str) -> Option<f64> {
    prices.get(field).and_then(Value::as_f64).filter(|n| n.is_finite())
}

/// Quote client for the PriceCharting proxy plus the card-to-product map.
#[derive(Debug, Clone)]
pub struct PricechartingFeed {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    products: BTreeMap<String, String>,
}

impl PricechartingFeed {
    /// `None` unless both the endpoint and the key are configured.
    pub fn from_config(config: &PricechartingConfig) -> Result<Option<Self>, reqwest::Error> {
        let Some((endpoint, api_key)) = config.credentials() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Some(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            products: load_product_map(&config.map_path),
        }))
    }

    pub fn product_for(&self, card_id: &str) -> Option<&str> {
        self.products.get(card_id).map(String::as_str)
    }

    pub async fn quote(&self, product_id: &str) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, "application/json")
            .query(&[("k", self.api_key.as_str()), ("id", product_id)])
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
}

/// Product ids may be strings or numbers. A missing or malformed map quotes nothing.
pub fn load_product_map(path: &Path) -> BTreeMap<String, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "pricecharting map unreadable");
            }
            return BTreeMap::new();
        }
    };
    match serde_json::from_str::<Map<String, Value>>(&raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(card, product)| {
                let product = match product {
                    Value::String(s) if !s.trim().is_empty() => s,
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((card, product))
            })
            .collect(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "pricecharting map is not a JSON object");
            BTreeMap::new()
        }
    }
}

/// A missing file starts a fresh history; an unparseable one is an error.
fn load_history(path: &Path, id: &str) -> io::Result<PriceHistory> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PriceHistory::new(id)),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Default)]
pub struct PriceRunReport {
    pub files_read: usize,
    pub cards_written: usize,
    /// Cards whose existing history could not be read and was left as is.
    pub skipped: usize,
    pub quotes: usize,
    pub failures: Vec<ArtifactWriteError>,
}

pub async fn update_price_history(
    layout: &ArtifactLayout,
    config: &PriceConfig,
) -> Result<PriceRunReport, PipelineError> {
    let feed = PricechartingFeed::from_config(&config.pricecharting).map_err(PipelineError::Client)?;
    update_price_history_on(layout, config, feed.as_ref(), Utc::now().date_naive()).await
}

pub async fn update_price_history_on(
    layout: &ArtifactLayout,
    config: &PriceConfig,
    feed: Option<&PricechartingFeed>,
    today: NaiveDate,
) -> Result<PriceRunReport, PipelineError> {
    let dir = layout.price_dir();
    fs::create_dir_all(&dir).map_err(|source| PipelineError::Setup { path: dir, source })?;

    let mut report = PriceRunReport::default();
    let mut seen = HashSet::new();
    for file in name_artifacts(layout)? {
        let Some(cards) = read_artifact(&file) else {
            continue;
        };
        report.files_read += 1;
        for card in &cards {
            let Some(id) = card.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
                continue;
            };
            if !seen.insert(id.to_string()) {
                continue;
            }
            let path = layout.price_path(id);
            let mut history = match load_history(&path, id) {
                Ok(history) => history,
                Err(err) => {
                    tracing::warn!(card = id, path = %path.display(), error = %err, "price history unreadable, left untouched");
                    report.skipped += 1;
                    continue;
                }
            };
            history.record(card, today, config.retain_days);

            if let Some((feed, product)) = feed.and_then(|feed| Some((feed, feed.product_for(id)?))) {
                match feed.quote(product).await {
                    Ok(quote) => {
                        history.record_pricecharting(&quote, today, config.retain_days);
                        report.quotes += 1;
                    }
                    Err(err) => tracing::warn!(card = id, product, error = %err, "pricecharting quote failed"),
                }
            }

            let written = serde_json::to_vec(&history)
                .map_err(|err| ArtifactWriteError {
                    path: path.clone(),
                    source: err.into(),
                })
                .and_then(|body| write_artifact(&path, &body));
            match written {
                Ok(()) => report.cards_written += 1,
                Err(err) => {
                    tracing::error!(card = id, error = %err, "price history write failed");
                    report.failures.push(err);
                }
            }
        }
        if report.files_read % 25 == 0 {
            tracing::info!(files = report.files_read, "price files processed");
        }
    }
    tracing::info!(
        files = report.files_read,
        written = report.cards_written,
        skipped = report.skipped,
        quotes = report.quotes,
        failed = report.failures.len(),
        "price history updated"
    );
    Ok(report)
}
