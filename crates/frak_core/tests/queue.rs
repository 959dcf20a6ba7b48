mod common;

use common::capture_logs;
use frak_core::RingQueue;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn capacity_is_power_of_two_with_headroom() {
    let mut rng = rand::thread_rng();
    let mut requests: Vec<usize> = (1..=64).collect();
    requests.extend((0..64).map(|_| rng.gen_range(65..100_000)));

    for requested in requests {
        let q = RingQueue::<u8>::new(requested).unwrap();
        assert!(q.capacity() >= requested + 1, "requested {requested}");
        assert!(q.capacity().is_power_of_two(), "requested {requested}");
    }
}

#[test]
fn fifo_single_thread() {
    let q = RingQueue::new(4).unwrap();
    for i in 1..=4u32 {
        q.push(i).unwrap();
    }
    assert_eq!(q.len(), 4);
    assert!(!q.is_empty());

    for expected in 1..=4u32 {
        assert_eq!(q.pop(), Some(expected));
    }
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
    assert_eq!(q.pop(), None);
}

#[test]
fn push_n_is_bounded_by_free_slots() {
    let q = RingQueue::new(3).unwrap();
    assert_eq!(q.capacity(), 4);
    assert_eq!(q.push_n(&[10u32, 20, 30, 40]), 3);
    assert_eq!(q.len(), 3);

    assert_eq!(q.push(50), Err(50));
    assert_eq!(q.push_n(&[60]), 0);

    let mut out = Vec::new();
    assert_eq!(q.pop_n(&mut out, 8), 3);
    assert_eq!(out, [10, 20, 30]);
}

#[test]
fn pop_n_returns_what_is_there() {
    let q = RingQueue::new(8).unwrap();
    q.push('a').unwrap();
    q.push('b').unwrap();

    let mut out = Vec::new();
    assert_eq!(q.pop_n(&mut out, 3), 2);
    assert_eq!(out, ['a', 'b']);
    assert_eq!(q.pop_n(&mut out, 3), 0);
    assert_eq!(out.len(), 2);
}

#[test]
fn push_indices_numbers_the_reservation() {
    let q = RingQueue::<usize>::new(5).unwrap();
    assert_eq!(q.push_indices(5), 5);
    assert_eq!(q.push_indices(5), 2);

    let mut out = Vec::new();
    q.pop_n(&mut out, 16);
    assert_eq!(out, [0, 1, 2, 3, 4, 0, 1]);
}

#[test]
fn push_with_calls_fill_once_per_pushed_item() {
    let q = RingQueue::new(2).unwrap();
    let mut calls = Vec::new();
    let pushed = q.push_with(5, |i| {
        calls.push(i);
        i * 10
    });
    assert_eq!(pushed, 3);
    assert_eq!(calls, [0, 1, 2]);
}

#[test]
fn wraparound_keeps_len_consistent() {
    let q = RingQueue::new(6).unwrap();
    let capacity = q.capacity();
    let mut live = 0usize;
    let mut next = 0u64;
    let mut expected_front = 0u64;

    for round in 0..10 * capacity {
        q.push(next).unwrap();
        next += 1;
        live += 1;
        // Keep a varying number of items resident so the cursors wrap at
        // different offsets.
        if round % 3 != 0 || live > 4 {
            assert_eq!(q.pop(), Some(expected_front));
            expected_front += 1;
            live -= 1;
        }
        assert_eq!(q.len(), live);
        assert_eq!(q.is_empty(), live == 0);
    }

    while let Some(v) = q.pop() {
        assert_eq!(v, expected_front);
        expected_front += 1;
        live -= 1;
    }
    assert_eq!(live, 0);
    assert!(q.is_empty());
}

#[test]
fn dropping_non_empty_queue_drops_payloads() {
    let marker = Arc::new(());
    {
        let q = RingQueue::new(4).unwrap();
        q.push(Arc::clone(&marker)).unwrap();
        q.push(Arc::clone(&marker)).unwrap();
        assert_eq!(Arc::strong_count(&marker), 3);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn dropping_non_empty_queue_logs_a_warning() {
    let logs = capture_logs(|| {
        let q = RingQueue::new(4).unwrap();
        q.push_n(&[1u8, 2, 3]);
        assert_eq!(q.pop(), Some(1));
    });
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("dropping non-empty queue"), "{logs}");
    assert!(logs.contains("len=2"), "{logs}");

    let quiet = capture_logs(|| {
        let q = RingQueue::new(4).unwrap();
        q.push(1u8).unwrap();
        assert_eq!(q.pop(), Some(1));
    });
    assert!(!quiet.contains("dropping non-empty queue"), "{quiet}");
}

#[test]
fn panicking_fill_does_not_wedge_the_queue() {
    let q = Arc::new(RingQueue::<usize>::new(8).unwrap());

    let filled = panic::catch_unwind(AssertUnwindSafe(|| {
        q.push_with(3, |i| if i == 1 { panic!("fill failed") } else { i })
    }));
    assert!(filled.is_err());

    // A later producer must not spin behind the abandoned reservation.
    let (done, pushed) = mpsc::channel();
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            let result = q.push(42);
            done.send(result).unwrap();
        })
    };
    let result = pushed
        .recv_timeout(Duration::from_secs(5))
        .expect("push blocked behind a panicked producer");
    assert_eq!(result, Ok(()));
    producer.join().unwrap();

    // The item written before the panic survives; the unfilled slots are skipped.
    assert_eq!(q.pop(), Some(0));
    assert_eq!(q.pop(), Some(42));
    assert_eq!(q.pop(), None);
    assert!(q.is_empty());
}

#[test]
fn pop_n_skips_slots_a_panicking_fill_left_empty() {
    let q = RingQueue::<usize>::new(8).unwrap();
    let filled = panic::catch_unwind(AssertUnwindSafe(|| {
        q.push_with(4, |i| if i == 0 { panic!("fill failed") } else { i })
    }));
    assert!(filled.is_err());
    assert_eq!(q.push_indices(2), 2);

    // The first claim covers only empty slots; pop_n keeps claiming.
    let mut out = Vec::new();
    assert_eq!(q.pop_n(&mut out, 4), 2);
    assert_eq!(out, [0, 1]);
    assert_eq!(q.pop_n(&mut out, 4), 0);
    assert!(q.is_empty());
}

#[test]
fn producers_then_consumers_lose_nothing() {
    const PRODUCERS: usize = 5;
    const PER_PRODUCER: usize = 10_000;

    let q = Arc::new(RingQueue::new(PRODUCERS * PER_PRODUCER).unwrap());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut items: Vec<usize> =
                    (0..PER_PRODUCER).map(|i| p * PER_PRODUCER + i).collect();
                items.shuffle(&mut rand::thread_rng());
                let mut rest = &items[..];
                while !rest.is_empty() {
                    let chunk = rest.len().min(rand::thread_rng().gen_range(1..64));
                    let pushed = q.push_n(&rest[..chunk]);
                    assert_eq!(pushed, chunk);
                    rest = &rest[pushed..];
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    assert_eq!(q.len(), PRODUCERS * PER_PRODUCER);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let q = Arc::clone(&q);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                let mut local = Vec::new();
                loop {
                    let max = rand::thread_rng().gen_range(1..32);
                    if q.pop_n(&mut local, max) == 0 {
                        break;
                    }
                }
                seen.lock().unwrap().extend(local);
            })
        })
        .collect();
    for c in consumers {
        c.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    assert!(q.is_empty());
}

#[test]
fn concurrent_push_and_pop_lose_nothing() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 20_000;
    const TOTAL: u64 = PRODUCERS as u64 * PER_PRODUCER;

    // Deliberately small so producers keep hitting a full queue and
    // consumers keep hitting an empty one.
    let q = Arc::new(RingQueue::<u64>::new(64).unwrap());
    let consumed = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let producers: Vec<_> = (0..PRODUCERS as u64)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut next = p * PER_PRODUCER;
                let end = next + PER_PRODUCER;
                while next < end {
                    let n = (end - next).min(8) as usize;
                    let base = next;
                    next += q.push_with(n, |i| base + i as u64) as u64;
                    thread::yield_now();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = Arc::clone(&q);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut local = Vec::new();
                while consumed.load(std::sync::atomic::Ordering::Relaxed) < TOTAL {
                    let n = q.pop_n(&mut local, 16);
                    if n == 0 {
                        thread::yield_now();
                    } else {
                        consumed.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
                    }
                }
                local
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut all: Vec<u64> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();

    all.sort_unstable();
    assert_eq!(all.len() as u64, TOTAL);
    assert!(all.iter().copied().eq(0..TOTAL));
    assert!(q.is_empty());
}
