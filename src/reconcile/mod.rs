//! Reconciliation core: sharded accumulation, gap backfill, finalization.

pub mod catalog;
pub mod engine;
pub mod order;
pub mod pool;

pub use catalog::{Catalog, FinalizedCatalog};
pub use engine::{ReconciliationEngine, RunReport, Stage, StageFailure};
pub use pool::WorkerPool;
