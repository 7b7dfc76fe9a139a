//! Fan-out/fan-in over remote calls.
//!
//! `min(workers, items)` tasks pull indices from a shared cursor and write
//! each outcome into the slot of its input as soon as the call returns, so
//! results line up with inputs no matter which worker finished first. The
//! pool returns only once every worker has exited.
//!
//! A `Fatal` outcome stops the cursor and aborts the remaining workers. Calls
//! still in flight (retry sleeps included) are dropped and their slots stay
//! [`Slot::Skipped`], as does everything past the cursor. Only outcomes that
//! came back before the abort are reported. A worker that panics counts as
//! a fatal failure of the item it was working on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use licsync_core::RemoteError;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<R> {
    /// The call succeeded.
    Done(R),
    /// The remote service has no record for the item.
    Missing(RemoteError),
    /// The call failed fatally.
    Failed(RemoteError),
    /// Never taken, or cancelled before the call returned.
    Skipped,
}

/// Results of a pool run, in input order.
#[derive(Debug)]
pub struct PoolRun<R> {
    pub slots: Vec<Slot<R>>,
    /// Index and error of the first fatal failure.
    pub fatal: Option<(usize, RemoteError)>,
}

/// Bounded set of workers draining a list of items.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool. Zero is treated as one.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Worker ceiling.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every item and wait for all workers.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> PoolRun<R>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let total = items.len();
        let slots: Vec<Slot<R>> = std::iter::repeat_with(|| Slot::Skipped)
            .take(total)
            .collect();
        if total == 0 {
            return PoolRun { slots, fatal: None };
        }

        let slots = Arc::new(Mutex::new(slots));
        let items = Arc::new(items);
        let work = Arc::new(work);
        let cursor = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let spawned = self.workers.min(total);

        let mut set = JoinSet::new();
        let mut positions = HashMap::with_capacity(spawned);
        for worker in 0..spawned {
            let current = Arc::new(AtomicUsize::new(usize::MAX));
            let position = Arc::clone(&current);
            let slots = Arc::clone(&slots);
            let items = Arc::clone(&items);
            let work = Arc::clone(&work);
            let cursor = Arc::clone(&cursor);
            let stop = Arc::clone(&stop);
            let handle = set.spawn(async move {
                let mut taken = 0usize;
                while !stop.load(Ordering::Acquire) {
                    let index = cursor.fetch_add(1, Ordering::AcqRel);
                    let Some(item) = items.get(index).cloned() else {
                        break;
                    };
                    taken += 1;
                    position.store(index, Ordering::Release);
                    let (slot, fatal) = match work(item).await {
                        Ok(value) => (Slot::Done(value), None),
                        Err(err) if err.is_not_found() => (Slot::Missing(err), None),
                        Err(err) => {
                            stop.store(true, Ordering::Release);
                            (Slot::Failed(err.clone()), Some((index, err)))
                        }
                    };
                    {
                        let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(target) = guard.get_mut(index) {
                            *target = slot;
                        }
                    }
                    if fatal.is_some() {
                        debug!(worker, taken, "Worker stopped on fatal error");
                        return fatal;
                    }
                }
                debug!(worker, taken, "Worker finished");
                None
            });
            positions.insert(handle.id(), current);
        }

        let mut fatal: Option<(usize, RemoteError)> = None;
        while let Some(joined) = set.join_next().await {
            let (index, err) = match joined {
                Ok(Some(failure)) => failure,
                Ok(None) => continue,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => {
                    warn!(error = %err, "Worker task did not complete");
                    let index = positions
                        .get(&err.id())
                        .map_or(usize::MAX, |current| current.load(Ordering::Acquire));
                    let failure = RemoteError::fatal(format!("worker failed: {err}"));
                    {
                        let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(target) = guard.get_mut(index) {
                            if matches!(target, Slot::Skipped) {
                                *target = Slot::Failed(failure.clone());
                            }
                        }
                    }
                    (index, failure)
                }
            };
            if fatal.is_none() {
                stop.store(true, Ordering::Release);
                set.abort_all();
            }
            if fatal.as_ref().is_none_or(|(first, _)| index < *first) {
                fatal = Some((index, err));
            }
        }

        let slots = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
        PoolRun { slots, fatal }
    }
}
