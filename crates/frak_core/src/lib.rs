//! Concurrent work distribution for the frak image generator.
//!
//! This crate provides the lock-free bounded queue that holds pending work
//! items and the worker pool that drains it in batches across OS threads.
//! Both are generic over the payload type; the generator pushes pixel
//! indices, tests push plain integers.

use thiserror::Error;

/// Lock-free bounded multi-producer multi-consumer ring queue.
///
/// Producers and consumers reserve contiguous slot ranges with a
/// compare-and-swap on their cursor, copy payloads outside of any lock, and
/// then publish the range through a watermark so the other side never sees
/// a slot that is still being written or read.
pub mod queue;

/// Batch worker pool built on top of the ring queue.
///
/// A pool owns one queue and one callback. Starting it spawns a fixed number
/// of threads that pop batches until the queue reports empty, then exit.
/// The pool is meant for bounded jobs: enqueue everything, start, wait.
pub mod pool;

pub use pool::{CacheSize, PoolConfig, WorkerPool};
pub use queue::RingQueue;

/// Errors returned while building a queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The requested capacity plus headroom does not fit in a power of two.
    #[error("requested capacity {requested} overflows the slot count")]
    CapacityOverflow { requested: usize },

    /// The slot array could not be allocated.
    #[error("failed to allocate {slots} queue slots")]
    AllocationFailed { slots: usize },
}

/// Errors returned by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The backing queue could not be created.
    #[error("failed to create work queue: {0}")]
    Queue(#[from] QueueError),

    /// The OS refused to spawn a worker thread.
    ///
    /// Workers spawned before the failure keep running and are joined by
    /// the next `wait`.
    #[error("failed to spawn worker for pool {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more workers panicked inside the callback.
    #[error("{count} worker(s) of pool {name} panicked")]
    WorkerPanicked { name: String, count: usize },
}
