use log::debug;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{BowConfig, BowResult};

#[cfg(test)]
thread_local! {
    /// Dedicated pools built from this thread.
    pub(crate) static POOLS_BUILT: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

/// Bounded set of workers that process images by index.
///
/// With one worker everything runs on the calling thread. Otherwise work runs on a
/// dedicated rayon pool (or the global one when parallelism is 0).
pub(crate) struct WorkerPool {
    workers: usize,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    pub(crate) fn new(config: &BowConfig) -> BowResult<Self> {
        let workers = config.workers();
        let pool = match config.parallelism {
            0 | 1 => None,
            n => {
                #[cfg(test)]
                POOLS_BUILT.with(|c| c.set(c.get() + 1));
                Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .thread_name(|idx| format!("vbow-worker-{}", idx))
                        .build()?,
                )
            }
        };
        Ok(Self { workers, pool })
    }

    /// Run `f` inside the pool so nested rayon calls use its threads.
    fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Run `job` for every index in `0..n` and collect the results by index.
    ///
    /// Sequential pools use `state` directly. Parallel pools clone `state` once per
    /// worker, and each clone is dropped when its worker returns, on every path.
    /// Workers pull indices from a shared cursor. The first error stops the other
    /// workers from taking new indices and is returned; partial results are dropped.
    pub(crate) fn run<S, T, F>(&self, state: &mut S, n: usize, job: F) -> BowResult<Vec<Option<T>>>
    where
        S: Clone + Send,
        T: Send,
        F: Fn(&mut S, usize) -> BowResult<Option<T>> + Sync,
    {
        let workers = self.workers.min(n);
        if workers <= 1 {
            return (0..n).map(|i| job(state, i)).collect();
        }

        debug!("starting {} workers for {} images", workers, n);
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let clones: Vec<S> = (0..workers).map(|_| state.clone()).collect();

        let parts = self.install(|| {
            clones
                .into_par_iter()
                .with_max_len(1)
                .map(|mut local| {
                    let mut done = Vec::new();
                    while !failed.load(Ordering::Relaxed) {
                        let i = cursor.fetch_add(1, Ordering::Relaxed);
                        if i >= n {
                            break;
                        }
                        match job(&mut local, i) {
                            Ok(Some(v)) => done.push((i, v)),
                            Ok(None) => {}
                            Err(e) => {
                                failed.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                        }
                    }
                    Ok(done)
                })
                .collect::<BowResult<Vec<_>>>()
        })?;

        let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
        for (i, v) in parts.into_iter().flatten() {
            slots[i] = Some(v);
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BowErr;
    use std::sync::Arc;

    /// Counts how many instances are alive.
    struct Tracked(Arc<AtomicUsize>, Arc<AtomicUsize>);

    impl Clone for Tracked {
        fn clone(&self) -> Self {
            self.0.fetch_add(1, Ordering::SeqCst);
            self.1.fetch_add(1, Ordering::SeqCst);
            Tracked(self.0.clone(), self.1.clone())
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.1.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn config(parallelism: usize) -> BowConfig {
        BowConfig {
            parallelism,
            ..BowConfig::default()
        }
    }

    #[test]
    fn sequential_uses_shared_state() {
        let pool = WorkerPool::new(&config(1)).unwrap();
        let clones = Arc::new(AtomicUsize::new(0));
        let mut state = Tracked(clones.clone(), Arc::new(AtomicUsize::new(1)));
        let out = pool.run(&mut state, 5, |_, i| Ok(Some(i * 2))).unwrap();
        assert_eq!(out, vec![Some(0), Some(2), Some(4), Some(6), Some(8)]);
        assert_eq!(clones.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_clone_per_worker_released_after_run() {
        let pool = WorkerPool::new(&config(3)).unwrap();
        let clones = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(AtomicUsize::new(1));
        let mut state = Tracked(clones.clone(), alive.clone());
        let out = pool
            .run(&mut state, 50, |_, i| Ok(if i % 2 == 0 { Some(i) } else { None }))
            .unwrap();
        assert_eq!(out.len(), 50);
        assert_eq!(out[4], Some(4));
        assert_eq!(out[5], None);
        assert_eq!(clones.load(Ordering::SeqCst), 3);
        assert_eq!(alive.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_error_aborts_and_releases_clones() {
        let pool = WorkerPool::new(&config(4)).unwrap();
        let alive = Arc::new(AtomicUsize::new(1));
        let mut state = Tracked(Arc::new(AtomicUsize::new(0)), alive.clone());
        let res = pool.run(&mut state, 100, |_, i| {
            if i == 17 {
                Err(BowErr::Detection("boom".into()))
            } else {
                Ok(Some(i))
            }
        });
        assert!(matches!(res, Err(BowErr::Detection(_))));
        assert_eq!(alive.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fewer_images_than_workers() {
        let pool = WorkerPool::new(&config(8)).unwrap();
        let out = pool.run(&mut (), 2, |_, i| Ok(Some(i))).unwrap();
        assert_eq!(out, vec![Some(0), Some(1)]);
        let empty: Vec<Option<usize>> = pool.run(&mut (), 0, |_, i| Ok(Some(i))).unwrap();
        assert!(empty.is_empty());
    }
}
