use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::PoolError;
use crate::queue::RingQueue;

/// Batch size used when an explicit size of zero is configured, or when the
/// automatic computation rounds down to zero.
pub const DEFAULT_CACHE_SIZE: usize = 10;

/// Each worker takes roughly `1 / (AUTO_CACHE_DIVISOR * workers)` of the
/// queued work per batch when the batch size is automatic.
const AUTO_CACHE_DIVISOR: usize = 8;

/// Callback invoked by workers once per drained batch.
type BatchFn<T, C> = dyn Fn(&[T], &C) + Send + Sync;

/// How many items a worker pops per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheSize {
    /// Computed from the queue length when the pool starts, and forgotten
    /// again once the run is waited on.
    #[default]
    Auto,
    /// A fixed batch size. Zero means [`DEFAULT_CACHE_SIZE`].
    Fixed(usize),
}

/// Default worker count: four threads for every three online CPUs.
///
/// Never returns zero.
pub fn default_worker_count() -> usize {
    (4 * num_cpus::get() / 3).max(1)
}

/// Construction parameters for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Diagnostic name, also used as the worker thread name prefix.
    pub name: String,
    /// Number of worker threads. Zero selects [`default_worker_count`].
    pub worker_count: usize,
    /// Number of items the queue must be able to hold at once.
    pub queue_capacity: usize,
    /// Per-worker batch size.
    pub cache_size: CacheSize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "frak".to_string(),
            worker_count: 0,
            queue_capacity: 1024,
            cache_size: CacheSize::Auto,
        }
    }
}

/// A fixed-size pool of OS threads draining a [`RingQueue`] in batches.
///
/// The pool is idle until [`start`](Self::start) spawns its workers. Each
/// worker repeatedly pops a batch and hands it to the callback, and exits as
/// soon as a pop comes back empty. Work must therefore be enqueued before
/// starting: items pushed after the workers have seen an empty queue stay
/// queued until the next run.
///
/// The callback runs concurrently on every worker with the same context. Any
/// writes it makes through the context must target disjoint locations; the
/// pool does no output-side synchronization.
pub struct WorkerPool<T, C> {
    name: String,
    queue: Arc<RingQueue<T>>,
    callback: Arc<BatchFn<T, C>>,
    worker_count: usize,
    cache_size: CacheSize,
    auto_sized: bool,
    workers: Option<Vec<JoinHandle<()>>>,
}

impl<T, C> WorkerPool<T, C>
where
    T: Send + 'static,
    C: Send + Sync + 'static,
{
    /// Creates an idle pool whose queue holds at least `queue_capacity` items.
    ///
    /// A `worker_count` of zero selects [`default_worker_count`].
    pub fn new<F>(
        name: impl Into<String>,
        worker_count: usize,
        queue_capacity: usize,
        callback: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn(&[T], &C) + Send + Sync + 'static,
    {
        Self::from_config(
            PoolConfig {
                name: name.into(),
                worker_count,
                queue_capacity,
                cache_size: CacheSize::Auto,
            },
            callback,
        )
    }

    pub fn from_config<F>(config: PoolConfig, callback: F) -> Result<Self, PoolError>
    where
        F: Fn(&[T], &C) + Send + Sync + 'static,
    {
        let queue = RingQueue::new(config.queue_capacity)?;
        let worker_count = match config.worker_count {
            0 => default_worker_count(),
            n => n,
        };

        debug!(
            pool = %config.name,
            worker_count,
            capacity = queue.capacity(),
            "created worker pool"
        );

        Ok(Self {
            name: config.name,
            queue: Arc::new(queue),
            callback: Arc::new(callback),
            worker_count,
            cache_size: config.cache_size,
            auto_sized: false,
            workers: None,
        })
    }

    /// Fixes the per-worker batch size. Zero means [`DEFAULT_CACHE_SIZE`].
    pub fn set_cache_size(&mut self, size: usize) {
        self.cache_size = CacheSize::Fixed(size);
        self.auto_sized = false;
    }

    pub fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    /// Enqueues as many leading elements of `items` as fit and returns how
    /// many that was.
    pub fn push_n(&self, items: &[T]) -> usize
    where
        T: Clone,
    {
        self.queue.push_n(items)
    }

    pub fn push_with<F>(&self, n: usize, fill: F) -> usize
    where
        F: FnMut(usize) -> T,
    {
        self.queue.push_with(n, fill)
    }

    /// Spawns the workers, sharing `ctx` between them.
    ///
    /// Does nothing if the pool is already running. If the cache size is
    /// [`CacheSize::Auto`] it is computed here from the current queue length
    /// and stays fixed until [`wait`](Self::wait).
    pub fn start(&mut self, ctx: Arc<C>) -> Result<(), PoolError> {
        if self.workers.is_some() {
            debug!(pool = %self.name, "start ignored, workers already running");
            return Ok(());
        }

        let batch = self.resolve_cache_size().min(self.queue.capacity());
        debug!(
            pool = %self.name,
            workers = self.worker_count,
            batch,
            queued = self.queue.len(),
            "starting workers"
        );

        let mut handles = Vec::new();
        for id in 0..self.worker_count {
            let queue = Arc::clone(&self.queue);
            let callback = Arc::clone(&self.callback);
            let ctx = Arc::clone(&ctx);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, id))
                .spawn(move || drain(id, &queue, &*callback, &ctx, batch));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    self.workers = Some(handles);
                    return Err(PoolError::Spawn {
                        name: self.name.clone(),
                        source,
                    });
                }
            }
        }

        self.workers = Some(handles);
        Ok(())
    }

    fn resolve_cache_size(&mut self) -> usize {
        match self.cache_size {
            CacheSize::Auto => {
                let computed =
                    self.queue.len() / AUTO_CACHE_DIVISOR.saturating_mul(self.worker_count);
                let size = if computed == 0 {
                    DEFAULT_CACHE_SIZE
                } else {
                    computed
                };
                self.cache_size = CacheSize::Fixed(size);
                self.auto_sized = true;
                size
            }
            CacheSize::Fixed(0) => DEFAULT_CACHE_SIZE,
            CacheSize::Fixed(size) => size,
        }
    }
}

impl<C> WorkerPool<usize, C>
where
    C: Send + Sync + 'static,
{
    /// Enqueues up to `n` sequential tickets `0..n`.
    pub fn push_indices(&self, n: usize) -> usize {
        self.queue.push_indices(n)
    }
}

impl<T, C> WorkerPool<T, C> {
    /// Blocks until every worker has drained the queue and exited.
    ///
    /// Returns immediately if the pool is idle. An automatically computed
    /// cache size is reset to [`CacheSize::Auto`] so the next run sizes its
    /// batches from its own queue length.
    pub fn wait(&mut self) -> Result<(), PoolError> {
        let Some(handles) = self.workers.take() else {
            return Ok(());
        };

        let panicked = handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();

        if self.auto_sized {
            self.cache_size = CacheSize::Auto;
            self.auto_sized = false;
        }

        debug!(pool = %self.name, remaining = self.queue.len(), "workers joined");

        if panicked > 0 {
            return Err(PoolError::WorkerPanicked {
                name: self.name.clone(),
                count: panicked,
            });
        }
        Ok(())
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    /// Number of worker threads spawned by the current run.
    pub fn active_workers(&self) -> usize {
        self.workers.as_ref().map_or(0, Vec::len)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn cache_size(&self) -> CacheSize {
        self.cache_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &RingQueue<T> {
        &self.queue
    }
}

impl<T, C> Drop for WorkerPool<T, C> {
    fn drop(&mut self) {
        if let Some(handles) = self.workers.take() {
            let panicked = handles
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count();
            warn!(pool = %self.name, panicked, "pool dropped while running, joined workers");
        }
    }
}

/// Worker body: pop a batch, run the callback, repeat until empty.
fn drain<T, C>(id: usize, queue: &RingQueue<T>, callback: &BatchFn<T, C>, ctx: &C, batch: usize) {
    let mut buffer = Vec::with_capacity(batch);
    let mut drained = 0;
    let mut batches = 0;

    loop {
        buffer.clear();
        let n = queue.pop_n(&mut buffer, batch);
        if n == 0 {
            break;
        }
        callback(&buffer, ctx);
        drained += n;
        batches += 1;
    }

    trace!(worker = id, drained, batches, "worker finished");
}
