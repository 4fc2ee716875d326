//! Reconciliation run: broad range queries, gap detection, targeted backfill.
//!
//! Accumulation is commutative: workers append into the sharded [Catalog] in
//! any order and only [Catalog::finalize] imposes the bucket order. Failures
//! are contained at range or key granularity and collected into the
//! [RunReport]; a run always yields a catalog with every expected key.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::data::key::Key;
use crate::data::record::normalize;
use crate::data::universe::{Universe, UniverseEntry};
use crate::error::UpstreamError;
use crate::reconcile::catalog::{Catalog, FinalizedCatalog};
use crate::reconcile::pool::WorkerPool;
use crate::upstream::{CardQuery, CardSource, DexRange, RawRecord, UpstreamClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// A range whose subdivisions were exhausted; its ids went to per-key queries.
    Range,
    /// Per-identifier query issued after a range gave up.
    Fallback,
    Backfill,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Range => "range",
            Self::Fallback => "fallback",
            Self::Backfill => "backfill",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    pub target: String,
    pub error: String,
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub records_received: usize,
    pub dropped_unidentified: usize,
    pub dropped_out_of_universe: usize,
    pub backfill_keys: Vec<String>,
    /// Ranges that fell back to per-identifier queries, in the order they gave up.
    pub fallback_ranges: Vec<DexRange>,
    pub failures: Vec<StageFailure>,
}

#[derive(Default)]
struct RunState {
    received: AtomicUsize,
    unidentified: AtomicUsize,
    out_of_universe: AtomicUsize,
    fallback_ranges: Mutex<Vec<DexRange>>,
    failures: Mutex<Vec<StageFailure>>,
}

impl RunState {
    fn fail(&self, stage: Stage, target: impl Into<String>, error: &UpstreamError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StageFailure {
                stage,
                target: target.into(),
                error: error.to_string(),
                transient: error.is_transient(),
            });
    }

    fn into_report(self, run_id: Uuid, backfill: &[&UniverseEntry]) -> RunReport {
        RunReport {
            run_id,
            records_received: self.received.into_inner(),
            dropped_unidentified: self.unidentified.into_inner(),
            dropped_out_of_universe: self.out_of_universe.into_inner(),
            backfill_keys: backfill.iter().map(|entry| entry.name.clone()).collect(),
            fallback_ranges: self
                .fallback_ranges
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            failures: self
                .failures
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

pub struct ReconciliationEngine<'u, S> {
    client: UpstreamClient<S>,
    universe: &'u Universe,
    config: EngineConfig,
}

impl<'u, S: CardSource> ReconciliationEngine<'u, S> {
    pub fn new(client: UpstreamClient<S>, universe: &'u Universe, config: EngineConfig) -> Self {
        Self {
            client,
            universe,
            config,
        }
    }

    pub fn client(&self) -> &UpstreamClient<S> {
        &self.client
    }

    /// Full run: broad pool, backfill plan, backfill pool, finalize.
    pub async fn run(&self) -> (FinalizedCatalog, RunReport) {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", %run_id);
        async {
            let catalog = Catalog::for_universe(self.universe);
            let state = RunState::default();

            self.run_broad(&catalog, &state).await;
            let plan = self.plan_backfill(&catalog);
            tracing::info!(keys = plan.len(), "backfill planned");
            self.run_backfill(&plan, &catalog, &state).await;

            let report = state.into_report(run_id, &plan);
            let finalized = catalog.finalize();
            tracing::info!(
                keys = finalized.len(),
                empty = finalized.empty_keys().len(),
                received = report.records_received,
                failures = report.failures.len(),
                "reconciliation finished"
            );
            (finalized, report)
        }
        .instrument(span)
        .await
    }

    async fn run_broad(&self, catalog: &Catalog, state: &RunState) {
        let ranges: Vec<DexRange> = self.config.ranges.iter().copied().map(DexRange::from).collect();
        let pause = self.config.range_pause();
        WorkerPool::with_workers(self.config.broad_concurrency)
            .run(&ranges, move |range| async move {
                tracing::info!(range = %range, "fetching range");
                self.fetch_range_adaptive(*range, 0, catalog, state).await;
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            })
            .await;
    }

    /// Universe entries to re-query: the configured sparse names and dex ids,
    /// and entries at or above the boundary with fewer records than the threshold.
    pub fn plan_backfill(&self, catalog: &Catalog) -> Vec<&'u UniverseEntry> {
        let policy = &self.config.backfill;
        self.universe
            .entries()
            .iter()
            .filter(|entry| {
                policy.sparse_names.contains(&entry.name)
                    || policy.sparse_dex.contains(&entry.dex)
                    || (entry.dex >= policy.from_dex
                        && catalog.count(&Key::Name(entry.name.clone())) < policy.min_records)
            })
            .collect()
    }

    async fn run_backfill(&self, plan: &[&'u UniverseEntry], catalog: &Catalog, state: &RunState) {
        let pause = self.config.query_pause();
        WorkerPool::with_workers(self.config.backfill_concurrency)
            .run(plan, move |&entry| async move {
                let key = Key::Name(entry.name.clone());
                let before = catalog.count(&key);
                for query in self.backfill_queries(entry) {
                    match self.client.fetch_all(&query).await {
                        Ok(raws) => self.accumulate(catalog, state, raws, Some(entry)),
                        Err(err) => {
                            tracing::warn!(key = %entry.name, query = %query, error = %err, "backfill failed");
                            state.fail(Stage::Backfill, query.to_string(), &err);
                        }
                    }
                }
                tracing::info!(
                    key = %entry.name,
                    added = catalog.count(&key).saturating_sub(before),
                    "backfill merged"
                );
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            })
            .await;
    }

    /// Fetches one range; on failure halves it (both halves concurrently) until
    /// it is no wider than `min_split_span` (or the optional depth cap is hit),
    /// then queries each identifier on its own.
    fn fetch_range_adaptive<'a>(
        &'a self,
        range: DexRange,
        depth: u32,
        catalog: &'a Catalog,
        state: &'a RunState,
    ) -> BoxFuture<'a, ()> {
        async move {
            let err = match self.client.fetch_all(&CardQuery::DexRange(range)).await {
                Ok(raws) => {
                    tracing::info!(range = %range, cards = raws.len(), "range fetched");
                    self.accumulate(catalog, state, raws, None);
                    return;
                }
                Err(err) => err,
            };

            let below_cap = self.config.max_split_depth.map_or(true, |cap| depth < cap);
            if range.width() > self.config.min_split_span && below_cap {
                if let Some((low, high)) = range.split() {
                    tracing::warn!(range = %range, depth, error = %err, "range failed, splitting");
                    futures_util::join!(
                        self.fetch_range_adaptive(low, depth + 1, catalog, state),
                        self.fetch_range_adaptive(high, depth + 1, catalog, state),
                    );
                    return;
                }
            }

            tracing::warn!(range = %range, depth, error = %err, "range failed, querying ids one at a time");
            state.fail(Stage::Range, range.to_string(), &err);
            state
                .fallback_ranges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(range);
            self.fetch_ids_individually(range, catalog, state).await;
        }
        .boxed()
    }

    async fn fetch_ids_individually(&self, range: DexRange, catalog: &Catalog, state: &RunState) {
        let pause = self.config.query_pause();
        for dex in range.ids() {
            let Some(entry) = self.universe.by_dex(dex) else {
                continue;
            };
            match self.fetch_entry(entry).await {
                Ok(raws) => {
                    tracing::debug!(key = %entry.name, cards = raws.len(), "fallback fetched");
                    self.accumulate(catalog, state, raws, Some(entry));
                }
                Err(err) => {
                    tracing::warn!(key = %entry.name, error = %err, "fallback failed, key may finalize empty");
                    state.fail(Stage::Fallback, entry.name.as_str(), &err);
                }
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Name query (widened by `name_variants`), plus a dex query for sparse dex ids.
    fn backfill_queries(&self, entry: &UniverseEntry) -> Vec<CardQuery> {
        let mut queries = vec![self.name_query(entry)];
        if self.config.backfill.sparse_dex.contains(&entry.dex) {
            queries.push(CardQuery::Dex(entry.dex));
        }
        queries
    }

    fn name_query(&self, entry: &UniverseEntry) -> CardQuery {
        CardQuery::for_name(&entry.name, self.config.name_variants.get(&entry.name))
    }

    async fn fetch_entry(&self, entry: &UniverseEntry) -> Result<Vec<RawRecord>, UpstreamError> {
        self.client.fetch_all(&self.name_query(entry)).await
    }

    fn accumulate(
        &self,
        catalog: &Catalog,
        state: &RunState,
        raws: Vec<RawRecord>,
        target: Option<&UniverseEntry>,
    ) {
        state.received.fetch_add(raws.len(), Ordering::Relaxed);
        for raw in &raws {
            let record = normalize(raw);
            if !record.is_identified() {
                state.unidentified.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if catalog.route(self.universe, &record, target) == 0 {
                state.out_of_universe.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
