//! Artifact persistence: file layout, catalog writer, offline dex re-index.

pub mod layout;
pub mod reindex;
pub mod writer;

pub use layout::ArtifactLayout;
pub use reindex::{reindex, ReindexReport};
pub use writer::{IndexEntry, IndexWriter, PersistReport};
