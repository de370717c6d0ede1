//! Per-thread accounting of the time spent combining and the number of
//! requests served while holding the combiner role.

use std::{
    sync::atomic::{AtomicU64, Ordering::Relaxed},
    time::Duration,
};

use quanta::{Clock, Instant};
use thread_local::ThreadLocal;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CombinerStat {
    pub combining_time: Duration,
    pub served: u64,
    pub sessions: u64,
    /// Most requests served in a single session.
    pub largest_batch: u64,
}

impl std::ops::Add for CombinerStat {
    type Output = CombinerStat;

    fn add(self, rhs: Self) -> Self::Output {
        CombinerStat {
            combining_time: self.combining_time + rhs.combining_time,
            served: self.served + rhs.served,
            sessions: self.sessions + rhs.sessions,
            largest_batch: self.largest_batch.max(rhs.largest_batch),
        }
    }
}

#[derive(Debug, Default)]
struct LocalStat {
    time_ns: AtomicU64,
    served: AtomicU64,
    sessions: AtomicU64,
    largest_batch: AtomicU64,
}

impl LocalStat {
    fn snapshot(&self) -> CombinerStat {
        CombinerStat {
            combining_time: Duration::from_nanos(self.time_ns.load(Relaxed)),
            served: self.served.load(Relaxed),
            sessions: self.sessions.load(Relaxed),
            largest_batch: self.largest_batch.load(Relaxed),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CombinerStats {
    clock: Clock,
    local: ThreadLocal<LocalStat>,
}

impl CombinerStats {
    pub(crate) fn new() -> Self {
        Self {
            clock: Clock::new(),
            local: ThreadLocal::new(),
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn record(&self, begin: Instant, served: usize) {
        let elapsed = self.clock.now().duration_since(begin);
        let local = self.local.get_or_default();
        local
            .time_ns
            .fetch_add(elapsed.as_nanos() as u64, Relaxed);
        local.served.fetch_add(served as u64, Relaxed);
        local.sessions.fetch_add(1, Relaxed);
        local.largest_batch.fetch_max(served as u64, Relaxed);
    }

    /// Statistics of the calling thread, `None` if it never combined.
    pub(crate) fn current_thread(&self) -> Option<CombinerStat> {
        self.local.get().map(LocalStat::snapshot)
    }

    pub(crate) fn total(&self) -> CombinerStat {
        self.local
            .iter()
            .map(LocalStat::snapshot)
            .fold(CombinerStat::default(), |acc, s| acc + s)
    }
}
