//! Level-by-level task execution and the engine handle.
//!
//! # Architecture
//!
//! ```text
//! level 0 (leaves) ──► SegQueue ──► worker 0..W ──► BlockCache
//! level 1          ──► SegQueue ──► worker 0..W ──► BlockCache
//! ...
//! root level       ──► caller thread, chunk 0, 1, 2, ... ──► sink
//! ```
//!
//! Every task of a level depends only on tasks of the level below, so a level
//! is a flat pool of independent work. Workers pop task ids from a lock-free
//! `SegQueue` until it is empty; the first error stops the level and every
//! later one.

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use daft_cache::BlockCache;
use daft_store::ArrayStore;

use crate::config::DaftConfig;
use crate::error::{DaftError, DaftResult};
use crate::graph::{ComputationGraph, TaskId};
use crate::kernel::{Complex64, FftKernel, RustFftKernel};
use crate::signal::SignalSource;

/// Default in-core threshold: 2^24 elements (256 MiB of complex128).
pub const DEFAULT_CHUNKSIZE: usize = 1 << 24;

/// Shared flag that asks a running computation to stop.
///
/// Clones observe the same flag. Workers check it before each task and the
/// root sweep before each chunk; a cancelled run returns
/// [`DaftError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> DaftResult<()> {
        if self.is_cancelled() {
            Err(DaftError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs one level of independent tasks on a fixed number of scoped threads.
#[derive(Debug, Clone)]
pub struct Executor {
    workers: usize,
    cancel: CancelToken,
}

impl Executor {
    pub fn new(workers: usize, cancel: CancelToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `run` for every task of one level.
    ///
    /// Tasks are enqueued in the given order. Returns the first error any
    /// worker hit; remaining tasks are skipped once an error is recorded.
    pub fn run_level<F>(&self, level: usize, tasks: &[TaskId], run: F) -> DaftResult<()>
    where
        F: Fn(TaskId) -> DaftResult<()> + Sync,
    {
        if tasks.is_empty() {
            return Ok(());
        }

        let queue = SegQueue::new();
        for &id in tasks {
            queue.push(id);
        }

        let first_error: Mutex<Option<DaftError>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);
        let threads = self.workers.min(tasks.len());

        let work = || {
            while let Some(id) = queue.pop() {
                if abort.load(Ordering::Acquire) {
                    break;
                }
                let result = self.cancel.check().and_then(|()| run(id));
                match result {
                    Ok(()) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                        trace!(task = id.0, level, "Task complete");
                    }
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        first_error.lock().get_or_insert(e);
                        break;
                    }
                }
            }
        };

        if threads == 1 {
            work();
        } else {
            std::thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(&work);
                }
            });
        }

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        debug!(
            level,
            tasks = completed.load(Ordering::Relaxed),
            threads,
            "Level complete"
        );
        Ok(())
    }
}

/// Engine handle: kernel, chunk size, worker count and cancellation.
///
/// # Example
///
/// ```
/// use daft::{BlockCache, CacheConfig, Complex64, Daft};
///
/// let signal: Vec<Complex64> = (0..64).map(|i| Complex64::new(i as f64, 0.0)).collect();
/// let cache = BlockCache::new(CacheConfig::default());
/// let spectrum = Daft::new().with_chunksize(8).compute(&signal, &cache).unwrap();
/// assert_eq!(spectrum.len(), 64);
/// ```
#[derive(Clone)]
pub struct Daft {
    kernel: Arc<dyn FftKernel>,
    chunksize: usize,
    workers: usize,
    cancel: CancelToken,
}

impl std::fmt::Debug for Daft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daft")
            .field("kernel", &self.kernel.name())
            .field("chunksize", &self.chunksize)
            .field("workers", &self.workers)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Default for Daft {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker count when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl Daft {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(RustFftKernel::default()),
            chunksize: DEFAULT_CHUNKSIZE,
            workers: default_workers(),
            cancel: CancelToken::new(),
        }
    }

    /// Engine settings from the `engine` config section.
    pub fn from_config(config: &DaftConfig) -> Self {
        let engine = &config.engine;
        Self {
            kernel: Arc::new(RustFftKernel::new(engine.check_finite)),
            chunksize: engine.chunksize,
            workers: if engine.workers == 0 {
                default_workers()
            } else {
                engine.workers
            },
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_kernel(mut self, kernel: Arc<dyn FftKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    #[must_use]
    pub fn with_chunksize(mut self, chunksize: usize) -> Self {
        self.chunksize = chunksize;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn kernel(&self) -> &dyn FftKernel {
        self.kernel.as_ref()
    }

    pub fn chunksize(&self) -> usize {
        self.chunksize
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn executor(&self) -> Executor {
        Executor::new(self.workers, self.cancel.clone())
    }

    /// Transform `signal` into an in-memory vector.
    pub fn compute<S>(&self, signal: &S, cache: &BlockCache) -> DaftResult<Vec<Complex64>>
    where
        S: SignalSource + ?Sized,
    {
        ComputationGraph::build(signal, self.chunksize)?.compute(self, cache)
    }

    /// Transform `signal` into dataset `name` of `store`.
    ///
    /// Returns the number of elements written.
    pub fn write_to_store<S>(
        &self,
        signal: &S,
        store: &dyn ArrayStore,
        name: &str,
        cache: &BlockCache,
    ) -> DaftResult<u64>
    where
        S: SignalSource + ?Sized,
    {
        ComputationGraph::build(signal, self.chunksize)?.write_to_store(self, store, name, cache)
    }
}
