use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::*},
        Arc, Mutex,
    },
    thread::{self, available_parallelism},
    time::{Duration, Instant},
};

use serial_test::serial;
use strum::IntoEnumIterator;

use crate::{
    config::LockConfig,
    dlock::DLock,
    drmcs::DrmcsLock,
    lock::{LockKind, LockType, RawLock},
    mcs::McsLock,
    mrqd::MrqdLock,
    qd::QdLock,
    relax::Yield,
    tatas::{TatasLock, TatasMutex},
};

const THREAD_NUM: usize = 4;
const ITERATION: usize = 20_000;

fn spawn_workers<F>(count: usize, work: F) -> Vec<thread::JoinHandle<()>>
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let cpu_count = available_parallelism().map_or(1, |n| n.get());
    let work = Arc::new(work);
    (0..count)
        .map(|i| {
            let work = work.clone();
            thread::Builder::new()
                .name(i.to_string())
                .spawn(move || {
                    core_affinity::set_for_current(core_affinity::CoreId { id: i % cpu_count });
                    work(i)
                })
                .unwrap()
        })
        .collect()
}

fn join_all(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        handle.join().unwrap();
    }
}

fn counter_test(kind: LockKind, threads: usize, iterations: usize) {
    let lock = Arc::new(DLock::initialize(kind, 0usize, &LockConfig::default()).unwrap());

    let handles = {
        let lock = lock.clone();
        spawn_workers(threads, move |_| {
            for _ in 0..iterations {
                lock.delegate(|counter| *counter += 1);
            }
        })
    };
    join_all(handles);

    let lock = Arc::try_unwrap(lock).unwrap();
    assert!(!lock.is_locked());
    assert_eq!(lock.into_inner(), threads * iterations);
    println!("finish testing {}", kind);
}

#[test]
#[serial]
pub fn qd_no_lost_updates() {
    counter_test(LockKind::Qd, 4, 100_000);
}

#[test]
#[serial]
pub fn tatas_test() {
    counter_test(LockKind::Tatas, THREAD_NUM, ITERATION);
}

#[test]
#[serial]
pub fn mcs_test() {
    counter_test(LockKind::Mcs, THREAD_NUM, ITERATION);
}

#[test]
#[serial]
pub fn cc_test() {
    counter_test(LockKind::CCSynch, THREAD_NUM, ITERATION);
}

#[test]
#[serial]
pub fn drmcs_test() {
    counter_test(LockKind::Drmcs, THREAD_NUM, ITERATION);
}

#[test]
#[serial]
pub fn mrqd_test() {
    counter_test(LockKind::Mrqd, THREAD_NUM, ITERATION);
}

#[test]
#[serial]
pub fn qd_over_mcs_test() {
    let config = LockConfig::default();
    let base = McsLock::<Yield>::with_config(&config).unwrap();
    let lock = Arc::new(DLock::new(
        QdLock::<McsLock<Yield>, Yield>::with_base(base, &config).unwrap(),
        0usize,
    ));

    let handles = {
        let lock = lock.clone();
        spawn_workers(THREAD_NUM, move |i| {
            for _ in 0..ITERATION {
                if i % 2 == 0 {
                    lock.delegate(|counter| *counter += 1);
                } else {
                    *lock.lock() += 1;
                }
            }
        })
    };
    join_all(handles);

    assert_eq!(Arc::try_unwrap(lock).unwrap().into_inner(), THREAD_NUM * ITERATION);
}

/// Half of the threads take the lock, the other half delegate; nobody may
/// ever observe another thread inside the critical section.
#[test]
#[serial]
pub fn mutual_exclusion_every_kind() {
    for kind in LockKind::iter() {
        let lock = Arc::new(DLock::initialize(kind, 0usize, &LockConfig::default()).unwrap());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles = {
            let lock = lock.clone();
            let inside = inside.clone();
            spawn_workers(THREAD_NUM, move |i| {
                let critical = |counter: &mut usize| {
                    assert_eq!(inside.fetch_add(1, SeqCst), 0, "two threads inside");
                    *counter += 1;
                    inside.fetch_sub(1, SeqCst);
                };
                for _ in 0..ITERATION / 4 {
                    if i % 2 == 0 {
                        critical(&mut *lock.lock());
                    } else {
                        lock.delegate(critical);
                    }
                }
            })
        };
        join_all(handles);

        let lock = Arc::try_unwrap(lock).unwrap();
        assert_eq!(lock.into_inner(), THREAD_NUM * (ITERATION / 4), "{}", kind);
    }
}

/// Every delegated operation runs exactly once, and the operations of one
/// thread run in the order that thread submitted them.
#[test]
#[serial]
pub fn exactly_once_in_submission_order() {
    const OPS: usize = 2_000;

    for kind in LockKind::iter() {
        let lock = Arc::new(
            DLock::initialize(kind, Vec::<(usize, usize)>::new(), &LockConfig::default()).unwrap(),
        );

        let handles = {
            let lock = lock.clone();
            spawn_workers(THREAD_NUM, move |i| {
                let mut last_len = 0;
                for seq in 0..OPS {
                    let len = lock.delegate(move |log| {
                        log.push((i, seq));
                        log.len()
                    });
                    assert!(len > last_len);
                    last_len = len;
                }
            })
        };
        join_all(handles);

        let log = Arc::try_unwrap(lock).unwrap().into_inner();
        assert_eq!(log.len(), THREAD_NUM * OPS, "{}", kind);
        let mut next = HashMap::new();
        for (thread, seq) in log {
            let expected = next.entry(thread).or_insert(0);
            assert_eq!(seq, *expected, "{}: thread {} out of order", kind, thread);
            *expected += 1;
        }
    }
}

/// Writers exclude readers and each other for every kind; readers only
/// exclude writers.
#[test]
#[serial]
pub fn reader_writer_exclusion_every_kind() {
    for kind in LockKind::iter() {
        let lock = Arc::new(DLock::initialize(kind, 0usize, &LockConfig::default()).unwrap());
        let writers = Arc::new(AtomicUsize::new(0));
        let readers = Arc::new(AtomicUsize::new(0));

        let handles = {
            let lock = lock.clone();
            spawn_workers(THREAD_NUM, move |i| {
                for n in 0..ITERATION / 8 {
                    match i % 4 {
                        0 => {
                            let mut guard = lock.lock();
                            assert_eq!(writers.fetch_add(1, SeqCst), 0);
                            assert_eq!(readers.load(SeqCst), 0);
                            *guard += 1;
                            writers.fetch_sub(1, SeqCst);
                        }
                        1 => lock.delegate(|counter| {
                            assert_eq!(writers.fetch_add(1, SeqCst), 0);
                            assert_eq!(readers.load(SeqCst), 0);
                            *counter += 1;
                            writers.fetch_sub(1, SeqCst);
                        }),
                        2 => {
                            let guard = lock.read_lock();
                            readers.fetch_add(1, SeqCst);
                            assert_eq!(writers.load(SeqCst), 0);
                            assert!(*guard <= 2 * (ITERATION / 8));
                            readers.fetch_sub(1, SeqCst);
                        }
                        _ => {
                            let seen = lock.read(|counter| {
                                readers.fetch_add(1, SeqCst);
                                assert_eq!(writers.load(SeqCst), 0);
                                let seen = *counter;
                                readers.fetch_sub(1, SeqCst);
                                seen
                            });
                            assert!(seen <= 2 * (ITERATION / 8), "read {} at {}", seen, n);
                        }
                    }
                }
            })
        };
        join_all(handles);

        let lock = Arc::try_unwrap(lock).unwrap();
        assert_eq!(lock.into_inner(), 2 * (ITERATION / 8), "{}", kind);
    }
}

#[test]
#[serial]
pub fn mcs_fifo() {
    const WAITERS: usize = 6;

    let lock = Arc::new(McsLock::<Yield>::with_config(&LockConfig::default()).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    lock.lock();
    let mut tail = lock.tail_slot();
    assert_eq!(tail, lock.local_slot());

    let mut handles = Vec::new();
    for i in 0..WAITERS {
        let waiter = lock.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            waiter.lock();
            order.lock().unwrap().push(i);
            unsafe { waiter.unlock() };
        }));
        // the next waiter is spawned only once this one has linked in
        while lock.tail_slot() == tail {
            thread::yield_now();
        }
        tail = lock.tail_slot();
    }

    unsafe { lock.unlock() };
    join_all(handles);

    assert_eq!(*order.lock().unwrap(), (0..WAITERS).collect::<Vec<_>>());
    assert!(!lock.is_locked());
}

#[cfg(feature = "combiner_stat")]
#[test]
#[serial]
pub fn bounded_batch() {
    const MAX_BATCH: usize = 4;
    const OPS: usize = 5_000;

    let config = LockConfig {
        max_batch: MAX_BATCH,
        ..LockConfig::default()
    };
    for kind in LockKind::iter().filter(|kind| kind.combines()) {
        let lock = Arc::new(DLock::initialize(kind, 0usize, &config).unwrap());

        let handles = {
            let lock = lock.clone();
            spawn_workers(2 * THREAD_NUM, move |_| {
                for _ in 0..OPS {
                    lock.delegate(|counter| *counter += 1);
                }
            })
        };
        join_all(handles);

        let total = lock.raw().combiner_total().unwrap();
        assert_eq!(total.served as usize, 2 * THREAD_NUM * OPS, "{}", kind);
        assert!(total.largest_batch as usize <= MAX_BATCH, "{}: {:?}", kind, total);
        assert!(total.sessions as usize * MAX_BATCH >= 2 * THREAD_NUM * OPS);
    }
}

#[test]
#[serial]
pub fn mrqd_no_torn_reads() {
    const READERS: usize = 8;
    const WRITES: usize = 20_000;

    let lock = Arc::new(DLock::initialize(LockKind::Mrqd, (0u64, 0u64), &LockConfig::default()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let readers = {
        let lock = lock.clone();
        let done = done.clone();
        spawn_workers(READERS, move |_| {
            let mut reads = 0u64;
            while !done.load(Acquire) || reads == 0 {
                let (a, b) = lock.read(|pair| *pair);
                assert_eq!(b, 2 * a, "torn read ({}, {})", a, b);
                reads += 1;
            }
        })
    };

    for _ in 0..WRITES {
        lock.delegate(|pair| {
            pair.0 += 1;
            pair.1 = pair.0 * 2;
        });
    }
    done.store(true, Release);
    join_all(readers);

    assert_eq!(Arc::try_unwrap(lock).unwrap().into_inner(), (WRITES as u64, 2 * WRITES as u64));
}

/// Races reader registration against intent publication: a reader inside
/// `read` and a writer inside `delegate` must never overlap.
#[test]
#[serial]
pub fn mrqd_intent_scan_race() {
    const ROUNDS: usize = 20_000;

    let config = LockConfig {
        shard_count: 4,
        ..LockConfig::default()
    };
    let lock = Arc::new(MrqdLock::<TatasLock<Yield>, Yield>::with_config(&config).unwrap());
    let writing = Arc::new(AtomicBool::new(false));
    let reading = Arc::new(AtomicUsize::new(0));

    let handles = {
        let lock = lock.clone();
        spawn_workers(THREAD_NUM, move |i| {
            for _ in 0..ROUNDS {
                if i == 0 {
                    lock.delegate(|| {
                        writing.store(true, SeqCst);
                        assert_eq!(reading.load(SeqCst), 0, "writer overlapped a reader");
                        writing.store(false, SeqCst);
                    });
                } else {
                    lock.read(|| {
                        reading.fetch_add(1, SeqCst);
                        assert!(!writing.load(SeqCst), "reader overlapped a writer");
                        reading.fetch_sub(1, SeqCst);
                    });
                }
            }
        })
    };
    join_all(handles);
    assert!(!lock.is_locked());
}

#[test]
#[serial]
pub fn mrqd_writer_waits_for_reader() {
    let lock = Arc::new(MrqdLock::<TatasLock<Yield>, Yield>::with_config(&LockConfig::default()).unwrap());
    let written = Arc::new(AtomicBool::new(false));

    lock.lock_shared();
    let writer = {
        let lock = lock.clone();
        let written = written.clone();
        thread::spawn(move || lock.delegate(|| written.store(true, SeqCst)))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !lock.writer_intent() && Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(lock.writer_intent());
    thread::sleep(Duration::from_millis(20));
    assert!(!written.load(SeqCst));

    unsafe { lock.unlock_shared() };
    writer.join().unwrap();
    assert!(written.load(SeqCst));
    assert!(!lock.writer_intent());
}

#[test]
#[serial]
pub fn mrqd_impatient_reader_raises_barrier() {
    let config = LockConfig {
        read_patience: 1,
        ..LockConfig::default()
    };
    let lock = Arc::new(MrqdLock::<TatasLock<Yield>, Yield>::with_config(&config).unwrap());

    lock.lock();
    let reader = {
        let lock = lock.clone();
        thread::spawn(move || {
            lock.lock_shared();
            unsafe { lock.unlock_shared() };
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while lock.write_barrier() == 0 && Instant::now() < deadline {
        thread::yield_now();
    }
    assert_eq!(lock.write_barrier(), 1);

    // new writers hold back while the barrier is up
    let contender = {
        let lock = lock.clone();
        thread::spawn(move || lock.try_lock())
    };
    assert!(!contender.join().unwrap());

    unsafe { lock.unlock() };
    reader.join().unwrap();
    assert_eq!(lock.write_barrier(), 0);
    assert!(!lock.is_locked());
}

fn readers_overlap<L: RawLock + 'static>(lock: Arc<L>) {
    let inside = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                lock.lock_shared();
                inside.fetch_add(1, SeqCst);
                let deadline = Instant::now() + Duration::from_secs(5);
                while inside.load(SeqCst) < 2 && Instant::now() < deadline {
                    thread::yield_now();
                }
                let overlapped = inside.load(SeqCst) == 2;
                unsafe { lock.unlock_shared() };
                overlapped
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap(), "readers did not overlap");
    }
    assert!(!lock.is_locked());
}

#[test]
#[serial]
pub fn drmcs_readers_overlap() {
    readers_overlap(Arc::new(DrmcsLock::<Yield>::with_config(&LockConfig::default()).unwrap()));
}

#[test]
#[serial]
pub fn mrqd_readers_overlap() {
    readers_overlap(Arc::new(
        MrqdLock::<TatasLock<Yield>, Yield>::with_config(&LockConfig::default()).unwrap(),
    ));
}

#[test]
#[serial]
pub fn drmcs_writer_waits_for_readers() {
    let lock = Arc::new(DrmcsLock::<Yield>::with_config(&LockConfig::default()).unwrap());
    let written = Arc::new(AtomicBool::new(false));

    lock.lock_shared();
    let writer = {
        let lock = lock.clone();
        let written = written.clone();
        thread::spawn(move || {
            lock.lock();
            written.store(true, SeqCst);
            unsafe { lock.unlock() };
        })
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!written.load(SeqCst));
    assert_eq!(lock.readers(), 1);

    unsafe { lock.unlock_shared() };
    writer.join().unwrap();
    assert!(written.load(SeqCst));
    assert!(!lock.is_locked());
}

#[test]
#[serial]
pub fn try_lock_and_is_locked_every_kind() {
    for kind in LockKind::iter() {
        let lock = DLock::initialize(kind, 7usize, &LockConfig::default()).unwrap();
        assert!(!lock.is_locked(), "{}", kind);

        let guard = lock.lock();
        assert_eq!(*guard, 7);
        assert!(lock.is_locked(), "{}", kind);
        thread::scope(|s| {
            let contended = s.spawn(|| lock.try_lock().is_none()).join().unwrap();
            assert!(contended, "{}: try_lock succeeded on a held lock", kind);
        });
        drop(guard);
        assert!(!lock.is_locked(), "{}", kind);

        let mut guard = lock.try_lock().unwrap();
        *guard += 1;
        drop(guard);
        assert_eq!(lock.into_inner(), 8, "{}", kind);
    }
}

#[test]
#[serial]
pub fn panic_propagates_and_lock_survives() {
    for kind in LockKind::iter() {
        let lock = DLock::initialize(kind, 0usize, &LockConfig::default()).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            lock.delegate(|_| -> () { panic!("boom") });
        }));
        assert!(result.is_err(), "{}", kind);
        assert!(!lock.is_locked(), "{}", kind);

        thread::scope(|s| {
            for _ in 0..THREAD_NUM {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        lock.delegate(|counter| *counter += 1);
                    }
                });
            }
        });
        assert_eq!(lock.into_inner(), THREAD_NUM * 1_000, "{}", kind);
    }
}

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, SeqCst);
    }
}

/// After the last delegation returns, every captured value has been released
/// and finalizing drops the protected data exactly once.
#[test]
#[serial]
pub fn resources_released_on_finalize() {
    for kind in LockKind::iter() {
        let drops = Arc::new(AtomicUsize::new(0));
        let lock = Arc::new(
            DLock::initialize(kind, Tracked(drops.clone()), &LockConfig::default()).unwrap(),
        );
        let captured = Arc::new(());

        let handles = {
            let lock = lock.clone();
            let captured = captured.clone();
            spawn_workers(THREAD_NUM, move |_| {
                for _ in 0..1_000 {
                    let token = captured.clone();
                    lock.delegate(move |_| drop(token));
                }
            })
        };
        join_all(handles);

        assert_eq!(Arc::strong_count(&captured), 1, "{}", kind);
        assert_eq!(Arc::strong_count(&lock), 1, "{}", kind);
        let lock = Arc::try_unwrap(lock).unwrap();
        assert_eq!(drops.load(SeqCst), 0);
        drop(lock.into_inner());
        assert_eq!(drops.load(SeqCst), 1, "{}", kind);
    }
}

#[test]
#[serial]
pub fn tatas_mutex_test() {
    let mutex = Arc::new(TatasMutex::new(0usize));
    let handles = {
        let mutex = mutex.clone();
        spawn_workers(THREAD_NUM, move |_| {
            for _ in 0..ITERATION {
                *mutex.lock() += 1;
            }
        })
    };
    join_all(handles);
    assert_eq!(*mutex.lock(), THREAD_NUM * ITERATION);
}

#[test]
#[serial]
pub fn raw_delegate_returns_result() {
    let config = LockConfig::default();
    let locks: Vec<LockType> = LockKind::iter()
        .map(|kind| LockType::initialize(kind, &config).unwrap())
        .collect();
    for lock in locks {
        let doubled = lock.delegate(|| 21 * 2);
        let read = lock.read(|| "shared");
        assert_eq!((doubled, read), (42, "shared"), "{}", lock);
        lock.finalize();
    }
}

#[cfg(debug_assertions)]
fn hold_on_other_thread<L: RawLock + 'static>(lock: &Arc<L>) {
    let holder = lock.clone();
    // the holder exits without releasing
    thread::spawn(move || holder.lock()).join().unwrap();
    assert!(lock.is_locked());
}

#[cfg(debug_assertions)]
#[test]
#[serial]
#[should_panic(expected = "not held by this thread")]
pub fn mcs_unlock_by_non_holder_panics() {
    let lock = Arc::new(McsLock::<Yield>::with_config(&LockConfig::default()).unwrap());
    hold_on_other_thread(&lock);
    unsafe { lock.unlock() };
}

#[cfg(debug_assertions)]
#[test]
#[serial]
#[should_panic(expected = "not held by this thread")]
pub fn tatas_unlock_by_non_holder_panics() {
    let lock = Arc::new(TatasLock::<Yield>::new());
    hold_on_other_thread(&lock);
    unsafe { RawLock::unlock(&*lock) };
}

#[cfg(debug_assertions)]
#[test]
#[serial]
pub fn unlock_by_non_holder_panics_every_kind() {
    for kind in LockKind::iter() {
        let lock = Arc::new(LockType::initialize(kind, &LockConfig::default()).unwrap());
        hold_on_other_thread(&lock);
        let unlocked = catch_unwind(AssertUnwindSafe(|| unsafe { lock.unlock() }));
        assert!(unlocked.is_err(), "{}", kind);
        assert!(lock.is_locked(), "{}", kind);
        // still held by the exited thread, so skip the finalize checks
        std::mem::forget(lock);
    }
}

#[test]
#[serial]
pub fn mrqd_read_falls_back_to_delegation_while_writer_holds() {
    let lock = Arc::new(MrqdLock::<TatasLock<Yield>, Yield>::with_config(&LockConfig::default()).unwrap());
    let read = Arc::new(AtomicBool::new(false));

    lock.lock();
    assert!(lock.writer_intent());
    let reader = {
        let lock = lock.clone();
        let read = read.clone();
        thread::spawn(move || {
            let value = lock.read(|| {
                read.store(true, SeqCst);
                7
            });
            #[cfg(feature = "combiner_stat")]
            assert!(lock.combiner_stat().map_or(0, |s| s.served) >= 1);
            value
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !lock.queued() && Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(lock.queued(), "read did not go through the queue");
    assert_eq!(lock.readers(), 0);
    thread::sleep(Duration::from_millis(20));
    assert!(!read.load(SeqCst));

    unsafe { lock.unlock() };
    assert_eq!(reader.join().unwrap(), 7);
    assert!(read.load(SeqCst));
    assert!(!lock.is_locked());
}

#[test]
#[serial]
pub fn qd_detached_returns_before_running() {
    let lock = Arc::new(DLock::new(
        QdLock::<TatasLock<Yield>, Yield>::with_config(&LockConfig::default()).unwrap(),
        0usize,
    ));

    let guard = lock.lock();
    let waiter = {
        let lock = lock.clone();
        thread::spawn(move || lock.delegate(|counter| *counter += 1))
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while !lock.raw().queued() && Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(lock.raw().queued());

    // the waiter is draining, so both calls return without running
    lock.delegate_detached(|counter| *counter += 10);
    assert!(lock.delegate_or_lock(|counter| *counter += 100).is_none());
    assert_eq!(*guard, 0);

    drop(guard);
    waiter.join().unwrap();
    let lock = Arc::try_unwrap(lock).unwrap();
    assert!(!lock.is_locked());
    assert_eq!(lock.into_inner(), 111);
}

#[test]
#[serial]
pub fn delegate_or_lock_takes_a_free_lock_every_kind() {
    for kind in LockKind::iter() {
        let lock = DLock::initialize(kind, 1usize, &LockConfig::default()).unwrap();
        let guard = lock
            .delegate_or_lock(|value| *value *= 5)
            .unwrap_or_else(|| panic!("{} was free but the op was queued", kind));
        assert_eq!(*guard, 5, "{}", kind);
        assert!(lock.is_locked(), "{}", kind);
        drop(guard);
        assert!(!lock.is_locked(), "{}", kind);
        assert_eq!(lock.into_inner(), 5);
    }
}

#[test]
#[serial]
pub fn mixed_delegation_every_kind() {
    for kind in LockKind::iter() {
        let config = LockConfig {
            max_batch: 2,
            ..LockConfig::default()
        };
        let lock = Arc::new(DLock::initialize(kind, 0usize, &config).unwrap());
        let locked = Arc::new(AtomicUsize::new(0));
        let handles = {
            let lock = lock.clone();
            let locked = locked.clone();
            spawn_workers(THREAD_NUM, move |id| {
                for i in 0..ITERATION / 4 {
                    match (id + i) % 3 {
                        0 => lock.delegate(|counter| *counter += 1),
                        1 => lock.delegate_detached(|counter| *counter += 1),
                        _ => {
                            if let Some(mut guard) = lock.delegate_or_lock(|counter| *counter += 1) {
                                *guard += 1;
                                locked.fetch_add(1, Relaxed);
                            }
                        }
                    }
                }
            })
        };
        join_all(handles);

        let lock = Arc::try_unwrap(lock).unwrap();
        assert!(!lock.is_locked(), "{}", kind);
        // a locked delegate_or_lock adds one more under its guard
        assert_eq!(
            lock.into_inner(),
            THREAD_NUM * (ITERATION / 4) + locked.load(SeqCst),
            "{}",
            kind
        );
    }
}
