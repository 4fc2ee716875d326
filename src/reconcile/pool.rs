//! Bounded worker pool for upstream work lists.
//!
//! A fixed number of logical workers pull the next item index from a shared
//! counter until the list is exhausted; [WorkerPool::run] returns once every
//! worker has finished. Workers run concurrently on the calling task, so a
//! worker sleeping in a backoff never blocks the others.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    /// Number of concurrent workers; never less than 1.
    pub workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl WorkerPool {
    pub fn with_workers(n: usize) -> Self {
        Self { workers: n.max(1) }
    }

    /// Applies `f` to every item with at most `workers` calls in flight.
    /// Results come back in item order regardless of completion order.
    pub async fn run<'a, T, R, F, Fut>(&self, items: &'a [T], f: F) -> Vec<R>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let workers = self.workers.max(1).min(items.len());
        let next = AtomicUsize::new(0);
        let next = &next;
        let f = &f;

        let batches = join_all((0..workers).map(move |_| async move {
            let mut done = Vec::new();
            loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(index) else {
                    break;
                };
                done.push((index, f(item).await));
            }
            done
        }))
        .await;

        let mut results: Vec<(usize, R)> = batches.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
