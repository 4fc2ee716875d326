//! Persists a finalized catalog: one array artifact per key (three encodings
//! per dex key) and a `{key, count}` summary index.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::data::key::Key;
use crate::data::record::Record;
use crate::error::{ArtifactWriteError, PipelineError};
use crate::index::layout::ArtifactLayout;
use crate::reconcile::catalog::FinalizedCatalog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub key: Key,
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub artifacts_written: usize,
    pub summary: Vec<IndexEntry>,
    pub failures: Vec<ArtifactWriteError>,
}

impl PersistReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IndexWriter {
    layout: ArtifactLayout,
}

impl IndexWriter {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Creates the artifact directories. The only fatal step of a persist.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        for dir in [self.layout.name_dir(), self.layout.dex_dir()] {
            fs::create_dir_all(&dir).map_err(|source| PipelineError::Setup { path: dir, source })?;
        }
        Ok(())
    }

    /// Fetch-run persist; the summary goes to `cards/index.json`.
    pub fn persist(&self, catalog: &FinalizedCatalog) -> Result<PersistReport, PipelineError> {
        self.persist_with_summary(catalog, &self.layout.index_path())
    }

    pub fn persist_with_summary(
        &self,
        catalog: &FinalizedCatalog,
        summary_path: &Path,
    ) -> Result<PersistReport, PipelineError> {
        self.prepare()?;
        let mut report = PersistReport::default();

        for (key, records) in catalog.iter() {
            let paths = match key {
                Key::Name(name) => vec![self.layout.name_path(name)],
                Key::Dex(dex) => self.layout.dex_paths(*dex),
            };
            let body = bucket_bytes(records);
            for path in paths {
                match write_artifact(&path, &body) {
                    Ok(()) => report.artifacts_written += 1,
                    Err(err) => {
                        tracing::error!(key = %key, error = %err, "artifact write failed");
                        report.failures.push(err);
                    }
                }
            }
            report.summary.push(IndexEntry {
                key: key.clone(),
                count: records.len(),
            });
        }

        match summary_bytes(&report.summary, summary_path).and_then(|body| write_artifact(summary_path, &body)) {
            Ok(()) => report.artifacts_written += 1,
            Err(err) => {
                tracing::error!(error = %err, "summary index write failed");
                report.failures.push(err);
            }
        }

        tracing::info!(
            written = report.artifacts_written,
            failed = report.failures.len(),
            keys = report.summary.len(),
            "catalog persisted"
        );
        Ok(report)
    }
}

/// Compact JSON array of record payloads.
pub fn bucket_bytes(records: &[Record]) -> Vec<u8> {
    // A Map<String, Value> payload always serializes.
    serde_json::to_vec(records).unwrap_or_else(|_| b"[]".to_vec())
}

fn summary_bytes(summary: &[IndexEntry], path: &Path) -> Result<Vec<u8>, ArtifactWriteError> {
    serde_json::to_vec_pretty(summary).map_err(|err| ArtifactWriteError {
        path: path.to_path_buf(),
        source: err.into(),
    })
}

pub fn write_artifact(path: &Path, body: &[u8]) -> Result<(), ArtifactWriteError> {
    fs::write(path, body).map_err(|source| ArtifactWriteError {
        path: path.to_path_buf(),
        source,
    })
}
