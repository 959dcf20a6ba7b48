use std::cell::UnsafeCell;
use std::fmt;
use std::hint::spin_loop;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::QueueError;

type Slot<T> = UnsafeCell<Option<T>>;

/// A heap-allocated, lock-free, bounded Multi-Producer Multi-Consumer queue.
///
/// The slot count is always a power of two and at least one larger than the
/// requested capacity; that spare slot is what lets `head == tail` mean
/// "empty" without a separate counter.
///
/// Cursors are free-running and wrap at `usize::MAX`. A cursor is turned
/// into a slot index with `cursor & mask`, and the number of live items is
/// `head - tail` in wrapping arithmetic, which always stays below the slot
/// count.
///
/// Each side has two cursors. `head` and `tail` are the reservation cursors
/// that producers and consumers race on with CAS. `committed` and `released`
/// trail them: a producer advances `committed` past its range only once its
/// payloads are written, and a consumer advances `released` only once it has
/// moved its payloads out. Consumers never claim beyond `committed` and
/// producers never reserve into slots below `released`, so a slot is never
/// read before it is written nor overwritten before it is read.
pub struct RingQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    _pad0: [u8; 64],
    head: AtomicUsize,
    _pad1: [u8; 64],
    committed: AtomicUsize,
    _pad2: [u8; 64],
    tail: AtomicUsize,
    _pad3: [u8; 64],
    released: AtomicUsize,
}

unsafe impl<T: Send> Sync for RingQueue<T> {}
unsafe impl<T: Send> Send for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Creates a queue able to hold at least `requested` items at once.
    ///
    /// The slot count is `requested + 1` rounded up to the next power of two.
    /// Fails if that count does not fit in a `usize` or cannot be allocated.
    pub fn new(requested: usize) -> Result<Self, QueueError> {
        let capacity = requested
            .checked_add(1)
            .and_then(usize::checked_next_power_of_two)
            .ok_or(QueueError::CapacityOverflow { requested })?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| QueueError::AllocationFailed { slots: capacity })?;
        slots.resize_with(capacity, || UnsafeCell::new(None));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            _pad0: [0; 64],
            head: AtomicUsize::new(0),
            _pad1: [0; 64],
            committed: AtomicUsize::new(0),
            _pad2: [0; 64],
            tail: AtomicUsize::new(0),
            _pad3: [0; 64],
            released: AtomicUsize::new(0),
        })
    }

    /// Number of slots, including the one that is never filled.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Snapshot of the number of reserved but not yet claimed items.
    ///
    /// Not linearizable with concurrent pushes and pops.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.mask)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a single item, handing it back if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let Some((start, _)) = self.reserve(1) else {
            return Err(item);
        };

        unsafe {
            // SAFETY: `reserve` granted this thread exclusive ownership of the
            // slot at `start`, which every consumer has already released.
            self.slot(start).write(Some(item));
        }

        publish(&self.committed, start, 1);
        Ok(())
    }

    /// Pops a single item, or returns `None` if nothing is committed.
    pub fn pop(&self) -> Option<T> {
        loop {
            let (start, _) = self.claim(1)?;

            let item = unsafe {
                // SAFETY: `claim` granted this thread exclusive ownership of
                // the slot at `start`, and its producer has committed it.
                (*self.slot(start)).take()
            };

            publish(&self.released, start, 1);
            if item.is_some() {
                return item;
            }
        }
    }

    /// Pushes as many leading elements of `items` as fit.
    ///
    /// Returns the number pushed, which is less than `items.len()` (possibly
    /// zero) when the queue runs out of room. The remaining elements are not
    /// enqueued.
    pub fn push_n(&self, items: &[T]) -> usize
    where
        T: Clone,
    {
        self.push_with(items.len(), |i| items[i].clone())
    }

    /// Reserves up to `n` slots and fills slot `i` of the reservation with
    /// `fill(i)`.
    ///
    /// `fill` is called exactly once for each index in `0..pushed`, in order,
    /// where `pushed` is the return value. Never waits for room.
    pub fn push_with<F>(&self, n: usize, mut fill: F) -> usize
    where
        F: FnMut(usize) -> T,
    {
        if n == 0 {
            return 0;
        }
        let Some((start, count)) = self.reserve(n) else {
            return 0;
        };

        // Commits the range even if `fill` unwinds; slots it never reached
        // stay `None` and consumers skip them.
        let _commit = Commit {
            watermark: &self.committed,
            start,
            count,
        };
        for i in 0..count {
            let item = fill(i);
            unsafe {
                // SAFETY: [start, start + count) was reserved by the CAS in
                // `reserve` and lies entirely in released slots.
                self.slot(start.wrapping_add(i)).write(Some(item));
            }
        }
        count
    }

    /// Moves up to `max` items into `out`, oldest first.
    ///
    /// Returns the number of items appended, zero if the queue is empty.
    /// Never waits for items to arrive. Slots left empty by a producer whose
    /// `fill` panicked are released without being counted.
    pub fn pop_n(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let before = out.len();
        out.reserve(max.min(self.capacity()));

        while out.len() == before {
            let Some((start, count)) = self.claim(max) else {
                break;
            };
            for i in 0..count {
                let item = unsafe {
                    // SAFETY: [start, start + count) was claimed by the CAS
                    // in `claim` and lies entirely below `committed`.
                    (*self.slot(start.wrapping_add(i))).take()
                };
                out.extend(item);
            }
            publish(&self.released, start, count);
        }
        out.len() - before
    }

    /// Reserves up to `n` free slots for writing.
    ///
    /// Returns the starting cursor and the number of slots granted, or `None`
    /// if no slot is free.
    fn reserve(&self, n: usize) -> Option<(usize, usize)> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let tail = self.released.load(Ordering::Acquire);
            let occupied = head.wrapping_sub(tail);
            if occupied > self.mask {
                // Our head snapshot predates slots that were since consumed.
                head = self.head.load(Ordering::Relaxed);
                continue;
            }

            let count = n.min(self.mask - occupied);
            if count == 0 {
                return None;
            }

            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(count),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some((head, count)),
                Err(actual_head) => head = actual_head,
            }
        }
    }

    /// Claims up to `max` committed slots for reading.
    fn claim(&self, max: usize) -> Option<(usize, usize)> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let head = self.committed.load(Ordering::Acquire);
            let occupied = head.wrapping_sub(tail);
            if occupied == 0 {
                return None;
            }
            if occupied > self.mask {
                tail = self.tail.load(Ordering::Relaxed);
                continue;
            }

            let count = max.min(occupied);
            match self.tail.compare_exchange_weak(
                tail,
                tail.wrapping_add(count),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some((tail, count)),
                Err(actual_tail) => tail = actual_tail,
            }
        }
    }

    #[inline(always)]
    fn slot(&self, cursor: usize) -> *mut Option<T> {
        self.slots[cursor & self.mask].get()
    }
}

/// Publishes a reserved producer range when dropped, including on unwind.
struct Commit<'a> {
    watermark: &'a AtomicUsize,
    start: usize,
    count: usize,
}

impl Drop for Commit<'_> {
    fn drop(&mut self) {
        publish(self.watermark, self.start, self.count);
    }
}

impl RingQueue<usize> {
    /// Reserves up to `n` slots and fills them with their position in the
    /// reservation, `0..pushed`.
    ///
    /// Used when items only need to be distinguishable tickets, such as pixel
    /// offsets into an output buffer.
    pub fn push_indices(&self, n: usize) -> usize {
        self.push_with(n, |i| i)
    }
}

/// Advances `watermark` from `start` to `start + count`.
///
/// Ranges are published in reservation order, so this spins until every
/// earlier range on the same side has been published.
fn publish(watermark: &AtomicUsize, start: usize, count: usize) {
    while watermark.load(Ordering::Acquire) != start {
        spin_loop();
    }
    watermark.store(start.wrapping_add(count), Ordering::Release);
}

impl<T> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &self.capacity())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        let len = self.len();
        if len != 0 {
            warn!(
                len,
                capacity = self.capacity(),
                "dropping non-empty queue, remaining items are discarded"
            );
        }
    }
}
