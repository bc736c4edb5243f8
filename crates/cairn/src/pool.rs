//! Bounded worker pool over a shared work queue.
//!
//! Dump and restore both process one collection per task. Each worker builds
//! its own state (usually a store session) once, then pulls tasks until the
//! queue is empty, the run is cancelled, or another worker has failed.

use cairn_core::{CairnError, CancelToken, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a pool run produced.
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// Results of the tasks that finished, in task order
    pub completed: Vec<R>,

    /// First task (or worker setup) failure, if any
    pub error: Option<CairnError>,

    /// Tasks never handed to a worker
    pub not_started: usize,
}

impl<R> PoolOutcome<R> {
    /// Completed results, or the first failure.
    pub fn into_result(self) -> Result<Vec<R>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.completed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every item with at most `workers` threads.
    ///
    /// `init` runs once per worker thread. A failure in `init` or `work`
    /// stops all workers from taking further items; tasks already running
    /// finish. Cancellation is observed before each item is taken.
    pub fn run<T, S, R, I, F>(
        &self,
        items: Vec<T>,
        cancel: &CancelToken,
        init: I,
        work: F,
    ) -> PoolOutcome<R>
    where
        T: Send,
        R: Send,
        I: Fn() -> Result<S> + Sync,
        F: Fn(&mut S, T) -> Result<R> + Sync,
    {
        let total = items.len();
        let queue: Mutex<VecDeque<(usize, T)>> =
            Mutex::new(items.into_iter().enumerate().collect());
        let results: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(total));
        let error: Mutex<Option<CairnError>> = Mutex::new(None);
        let failed = AtomicBool::new(false);

        let threads = self.workers.min(total);
        std::thread::scope(|scope| {
            for worker in 0..threads {
                let queue = &queue;
                let results = &results;
                let error = &error;
                let failed = &failed;
                let init = &init;
                let work = &work;
                scope.spawn(move || {
                    let fail = |e: CairnError| {
                        failed.store(true, Ordering::SeqCst);
                        let mut slot = error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    };

                    let mut state = match init() {
                        Ok(state) => state,
                        Err(e) => {
                            tracing::error!("Worker {} failed to start: {}", worker, e);
                            fail(e);
                            return;
                        }
                    };

                    loop {
                        if cancel.is_cancelled() || failed.load(Ordering::SeqCst) {
                            break;
                        }
                        let Some((index, item)) = queue.lock().pop_front() else {
                            break;
                        };
                        match work(&mut state, item) {
                            Ok(result) => results.lock().push((index, result)),
                            Err(e) => {
                                fail(e);
                                break;
                            }
                        }
                    }
                    tracing::trace!("Worker {} finished", worker);
                });
            }
        });

        let mut completed = results.into_inner();
        completed.sort_by_key(|(index, _)| *index);
        PoolOutcome {
            completed: completed.into_iter().map(|(_, r)| r).collect(),
            error: error.into_inner(),
            not_started: queue.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_results_in_task_order() {
        let pool = WorkerPool::new(3);
        let outcome = pool.run(
            (0..20).collect(),
            &CancelToken::new(),
            || Ok(()),
            |_, n: u32| Ok(n * 2),
        );
        assert!(outcome.error.is_none());
        assert_eq!(outcome.completed, (0..20).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(outcome.not_started, 0);
    }

    #[test]
    fn test_init_runs_once_per_worker() {
        let inits = AtomicUsize::new(0);
        let outcome = WorkerPool::new(2).run(
            (0..10).collect(),
            &CancelToken::new(),
            || {
                inits.fetch_add(1, Ordering::SeqCst);
                Ok(0u32)
            },
            |seen: &mut u32, n: u32| {
                *seen += 1;
                Ok(n)
            },
        );
        assert_eq!(outcome.completed.len(), 10);
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_stops_pool() {
        let outcome = WorkerPool::new(1).run(
            (0..10).collect(),
            &CancelToken::new(),
            || Ok(()),
            |_, n: u32| {
                if n == 3 {
                    Err(CairnError::Storage("boom".into()))
                } else {
                    Ok(n)
                }
            },
        );
        assert_eq!(outcome.completed, vec![0, 1, 2]);
        assert_eq!(outcome.not_started, 6);
        assert!(matches!(outcome.into_result(), Err(CairnError::Storage(_))));
    }

    #[test]
    fn test_cancelled_pool_takes_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = WorkerPool::new(4).run(
            vec![1, 2, 3],
            &cancel,
            || Ok(()),
            |_, n: u32| Ok(n),
        );
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.not_started, 3);
    }

    #[test]
    fn test_empty_input() {
        let outcome: PoolOutcome<u32> =
            WorkerPool::new(4).run(Vec::new(), &CancelToken::new(), || Ok(()), |_, n: u32| Ok(n));
        assert!(outcome.completed.is_empty());
        assert!(outcome.error.is_none());
    }
}
