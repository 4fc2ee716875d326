//! Read-only audit of persisted counts against live upstream counts.
//!
//! A bounded, prioritised subset of keys is checked with two count-only
//! queries each (by dex and by name); the larger count is taken as expected.
//! The resulting report is written next to the artifacts and never feeds back
//! into the catalog.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::config::{BackfillPolicy, VerifyConfig};
use crate::data::universe::{Universe, UniverseEntry};
use crate::error::{ArtifactWriteError, UpstreamError};
use crate::index::layout::ArtifactLayout;
use crate::index::reindex::read_artifact;
use crate::reconcile::catalog::FinalizedCatalog;
use crate::reconcile::pool::WorkerPool;
use crate::upstream::{CardQuery, CardSource, UpstreamClient};

pub const STEP_SUMMARY_ENV: &str = "GITHUB_STEP_SUMMARY";
const SUMMARY_TOP: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'u> {
    pub entry: &'u UniverseEntry,
    pub saved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapItem {
    pub key: String,
    pub dex: u32,
    pub saved: u64,
    pub expected: u64,
    pub gap: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub checked: usize,
    pub total_species: usize,
    pub missing: usize,
    pub items: Vec<GapItem>,
}

/// Persisted record counts per name key; a missing or unreadable artifact counts as 0.
pub fn saved_counts_from_disk(layout: &ArtifactLayout, universe: &Universe) -> BTreeMap<String, usize> {
    universe
        .entries()
        .iter()
        .map(|entry| {
            let count = read_artifact(&layout.name_path(&entry.name)).map_or(0, |records| records.len());
            (entry.name.clone(), count)
        })
        .collect()
}

/// Record counts per name key of a run that has not been re-read from disk.
pub fn saved_counts_from_catalog(catalog: &FinalizedCatalog) -> BTreeMap<String, usize> {
    catalog
        .iter()
        .filter_map(|(key, records)| key.as_name().map(|name| (name.to_string(), records.len())))
        .collect()
}

/// Keys worth spending upstream quota on, in dex order, at most `max_checks`:
/// empty or thin keys, keys at or above the backfill boundary, and sparse names or dex ids.
pub fn select_candidates<'u>(
    universe: &'u Universe,
    saved: &BTreeMap<String, usize>,
    config: &VerifyConfig,
    backfill: &BackfillPolicy,
) -> Vec<Candidate<'u>> {
    universe
        .entries()
        .iter()
        .map(|entry| Candidate {
            entry,
            saved: saved.get(&entry.name).copied().unwrap_or(0),
        })
        .filter(|candidate| {
            candidate.saved == 0
                || candidate.saved < config.low_count
                || candidate.entry.dex >= backfill.from_dex
                || backfill.sparse_names.contains(&candidate.entry.name)
                || backfill.sparse_dex.contains(&candidate.entry.dex)
        })
        .take(config.max_checks)
        .collect()
}

pub struct Verifier<S> {
    client: UpstreamClient<S>,
    config: VerifyConfig,
}

impl<S: CardSource> Verifier<S> {
    /// Count queries use the verifier's own retry policy.
    pub fn new(client: UpstreamClient<S>, config: VerifyConfig) -> Self {
        let client = client.with_retry(config.retry.clone());
        Self { client, config }
    }

    /// Upstream count for one key and its gap against `saved`; `None` when nothing is missing.
    pub async fn check(&self, candidate: &Candidate<'_>) -> Result<Option<GapItem>, UpstreamError> {
        let entry = candidate.entry;
        let by_dex = CardQuery::Dex(entry.dex);
        let by_name = CardQuery::Name(entry.name.clone());
        let (dex_count, name_count) = futures_util::try_join!(
            self.client.total_count(&by_dex),
            self.client.total_count(&by_name),
        )?;
        let expected = dex_count.max(name_count);
        let saved = candidate.saved as u64;
        Ok((expected > saved).then(|| GapItem {
            key: entry.name.clone(),
            dex: entry.dex,
            saved,
            expected,
            gap: expected - saved,
        }))
    }

    pub async fn verify(&self, candidates: &[Candidate<'_>], total_species: usize) -> VerificationReport {
        let pause = self.config.query_pause();
        let results = WorkerPool::with_workers(self.config.concurrency)
            .run(candidates, move |candidate| async move {
                let outcome = match self.check(candidate).await {
                    Ok(Some(item)) => {
                        tracing::info!(
                            key = %item.key,
                            dex = item.dex,
                            saved = item.saved,
                            expected = item.expected,
                            gap = item.gap,
                            "missing records"
                        );
                        Some(item)
                    }
                    Ok(None) => None,
                    Err(err) => {
                        tracing::warn!(key = %candidate.entry.name, error = %err, "verify check failed");
                        None
                    }
                };
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                outcome
            })
            .await;

        let mut items: Vec<GapItem> = results.into_iter().flatten().collect();
        items.sort_by(|a, b| b.gap.cmp(&a.gap).then_with(|| a.key.cmp(&b.key)));
        VerificationReport {
            checked: candidates.len(),
            total_species,
            missing: items.len(),
            items,
        }
    }
}

pub fn write_report(report: &VerificationReport, path: &Path) -> Result<(), ArtifactWriteError> {
    let fail = |source: std::io::Error| ArtifactWriteError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    let body = serde_json::to_vec_pretty(report).map_err(|err| fail(err.into()))?;
    fs::write(path, body).map_err(fail)
}

pub fn markdown_summary(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Verify vs API");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Checked species: **{}** / {}", report.checked, report.total_species);
    let _ = writeln!(out, "- Species with gaps: **{}**", report.missing);
    let _ = writeln!(out);
    let _ = writeln!(out, "Top {SUMMARY_TOP} gaps:");
    for item in report.items.iter().take(SUMMARY_TOP) {
        let _ = writeln!(
            out,
            "- {} (#{}): saved={}, expected={}, gap={}",
            item.key, item.dex, item.saved, item.expected, item.gap
        );
    }
    out
}

/// Appends the markdown summary to `path`, creating it if needed.
pub fn append_step_summary(report: &VerificationReport, path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(markdown_summary(report).as_bytes())
}
