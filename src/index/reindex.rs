//! Offline rebuild of the dex artifacts from persisted name artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::data::record::normalize;
use crate::data::universe::Universe;
use crate::error::PipelineError;
use crate::index::layout::{ArtifactLayout, INDEX_FILE};
use crate::index::writer::{IndexWriter, PersistReport};
use crate::reconcile::catalog::Catalog;
use crate::upstream::parse_upstream_envelope;

#[derive(Debug, Default)]
pub struct ReindexReport {
    pub files_read: usize,
    pub records_routed: usize,
    pub skipped_files: Vec<PathBuf>,
    pub persist: PersistReport,
}

/// Name artifact files in file-name order; the summary index is excluded.
pub fn name_artifacts(layout: &ArtifactLayout) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = layout.name_dir();
    let entries = fs::read_dir(&dir).map_err(|source| PipelineError::Setup {
        path: dir.clone(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|ext| ext.to_str()) == Some("json")
                && path.file_name().and_then(|name| name.to_str()) != Some(INDEX_FILE)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Reads one artifact as a list of raw records; `None` when unreadable or not a record list.
pub fn read_artifact(path: &Path) -> Option<Vec<Value>> {
    let raw = fs::read_to_string(path).ok()?;
    let json: Value = serde_json::from_str(&raw).ok()?;
    let envelope = parse_upstream_envelope(json);
    (!envelope.is_invalid()).then(|| envelope.into_records())
}

pub fn reindex(layout: &ArtifactLayout, universe: &Universe) -> Result<ReindexReport, PipelineError> {
    let catalog = Catalog::new(universe.dex_keys());
    let mut report = ReindexReport::default();

    for path in name_artifacts(layout)? {
        let Some(raws) = read_artifact(&path) else {
            tracing::warn!(path = %path.display(), "skipping unreadable name artifact");
            report.skipped_files.push(path);
            continue;
        };
        report.files_read += 1;
        for raw in &raws {
            let record = normalize(raw);
            if catalog.route(universe, &record, None) > 0 {
                report.records_routed += 1;
            }
        }
    }

    let finalized = catalog.finalize();
    let writer = IndexWriter::new(layout.clone());
    report.persist = writer.persist_with_summary(&finalized, &layout.dex_index_path())?;
    tracing::info!(
        files = report.files_read,
        routed = report.records_routed,
        skipped = report.skipped_files.len(),
        "dex index rebuilt"
    );
    Ok(report)
}
