//! End-to-end runs shared by the CLI and the integration tests.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::AppConfig;
use crate::data::universe::Universe;
use crate::error::PipelineError;
use crate::index::layout::ArtifactLayout;
use crate::index::writer::{IndexWriter, PersistReport};
use crate::reconcile::catalog::FinalizedCatalog;
use crate::reconcile::engine::{ReconciliationEngine, RunReport};
use crate::upstream::{CardSource, UpstreamClient};
use crate::verify::{
    append_step_summary, saved_counts_from_catalog, saved_counts_from_disk, select_candidates,
    write_report, VerificationReport, Verifier,
};

#[derive(Debug)]
pub struct FetchOutcome {
    pub catalog: FinalizedCatalog,
    pub run: RunReport,
    pub persist: PersistReport,
}

/// Reconcile against `source` and persist every expected key. Directory
/// setup happens before any upstream traffic so a bad output path fails fast.
pub async fn run_fetch<S: CardSource>(
    source: S,
    config: &AppConfig,
    universe: &Universe,
) -> Result<FetchOutcome, PipelineError> {
    let writer = IndexWriter::new(ArtifactLayout::new(&config.out_dir));
    writer.prepare()?;

    let client = UpstreamClient::new(source, &config.upstream);
    let engine = ReconciliationEngine::new(client, universe, config.engine.clone());
    let (catalog, run) = engine.run().await;
    let persist = writer.persist(&catalog)?;

    for failure in &run.failures {
        tracing::warn!(
            run_id = %run.run_id,
            stage = %failure.stage,
            target = %failure.target,
            transient = failure.transient,
            error = %failure.error,
            "contained failure"
        );
    }
    tracing::info!(
        run_id = %run.run_id,
        received = run.records_received,
        unidentified = run.dropped_unidentified,
        out_of_universe = run.dropped_out_of_universe,
        backfilled = run.backfill_keys.len(),
        failures = run.failures.len(),
        write_failures = persist.failures.len(),
        "fetch finished"
    );
    Ok(FetchOutcome {
        catalog,
        run,
        persist,
    })
}

/// Audits the persisted name artifacts and writes `cards/_verify.json`.
pub async fn run_verify<S: CardSource>(
    source: S,
    config: &AppConfig,
    universe: &Universe,
    step_summary: Option<&Path>,
) -> Result<VerificationReport, PipelineError> {
    let saved = saved_counts_from_disk(&ArtifactLayout::new(&config.out_dir), universe);
    verify_saved_counts(source, config, universe, &saved, step_summary).await
}

/// Same audit, with saved counts taken from a catalog still in memory.
pub async fn run_verify_catalog<S: CardSource>(
    source: S,
    config: &AppConfig,
    universe: &Universe,
    catalog: &FinalizedCatalog,
    step_summary: Option<&Path>,
) -> Result<VerificationReport, PipelineError> {
    let saved = saved_counts_from_catalog(catalog);
    verify_saved_counts(source, config, universe, &saved, step_summary).await
}

async fn verify_saved_counts<S: CardSource>(
    source: S,
    config: &AppConfig,
    universe: &Universe,
    saved: &BTreeMap<String, usize>,
    step_summary: Option<&Path>,
) -> Result<VerificationReport, PipelineError> {
    let layout = ArtifactLayout::new(&config.out_dir);
    let candidates = select_candidates(universe, saved, &config.verify, &config.engine.backfill);
    tracing::info!(
        checking = candidates.len(),
        total = universe.len(),
        "verifying persisted counts"
    );

    let verifier = Verifier::new(UpstreamClient::new(source, &config.upstream), config.verify.clone());
    let report = verifier.verify(&candidates, universe.len()).await;

    if let Err(err) = write_report(&report, &layout.verify_path()) {
        tracing::error!(error = %err, "verification report not written");
    }
    if let Some(path) = step_summary {
        if let Err(err) = append_step_summary(&report, path) {
            tracing::warn!(path = %path.display(), error = %err, "step summary not written");
        }
    }
    tracing::info!(missing = report.missing, checked = report.checked, "verify finished");
    Ok(report)
}
