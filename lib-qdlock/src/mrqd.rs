//! Multi-reader queue delegation lock.
//!
//! A QD lock plus a read indicator. Writers, delegated or not, go through the
//! base lock and then publish `writer_intent` and wait for the indicator to
//! drain. Readers register in the indicator and run in parallel as long as no
//! intent is published.
//!
//! Handshake (all `SeqCst`): the writer stores intent, then scans the
//! indicator; a reader registers, then loads intent. Either the scan sees the
//! reader or the reader sees the intent.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering::*},
};

use crossbeam::utils::CachePadded;
use derivative::Derivative;
use thread_local::ThreadLocal;

#[cfg(feature = "combiner_stat")]
use crate::combiner_stat::{CombinerStat, CombinerStats};
use crate::{
    arena::NodeId,
    config::{BackoffBounds, LockConfig},
    error::Result,
    lock::RawLock,
    qd_queue::{DelegationQueue, Signal},
    read_indicator::{ReadIndicator, ReadToken},
    relax::{wait_while, ExpBackoff, Relax},
    request::{Delegated, Request},
    tatas::TatasLock,
};

/// Departs on drop, so a panicking reader does not block writers.
struct Departing<'a> {
    indicator: &'a ReadIndicator,
    token: Option<ReadToken>,
}

impl Drop for Departing<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.indicator.depart(token);
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = "B: std::fmt::Debug"))]
pub struct MrqdLock<B = TatasLock, R = ExpBackoff> {
    base: B,
    queue: DelegationQueue,
    indicator: ReadIndicator,
    writer_intent: CachePadded<AtomicBool>,
    /// Blocked readers that ran out of patience. New writers hold back while
    /// it is non-zero.
    write_barrier: CachePadded<AtomicUsize>,
    #[derivative(Debug = "ignore")]
    local: ThreadLocal<NodeId>,
    max_batch: usize,
    read_patience: u32,
    bounds: BackoffBounds,
    #[cfg(feature = "combiner_stat")]
    stats: CombinerStats,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> MrqdLock<TatasLock<R>, R> {
    pub fn with_config(config: &LockConfig) -> Result<Self> {
        Self::with_base(TatasLock::with_config(config)?, config)
    }
}

impl<B: RawLock, R: Relax> MrqdLock<B, R> {
    pub fn with_base(base: B, config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base,
            queue: DelegationQueue::new()?,
            indicator: ReadIndicator::new(config.shard_count)?,
            writer_intent: CachePadded::new(AtomicBool::new(false)),
            write_barrier: CachePadded::new(AtomicUsize::new(0)),
            local: ThreadLocal::new(),
            max_batch: config.max_batch,
            read_patience: config.read_patience,
            bounds: config.backoff(),
            #[cfg(feature = "combiner_stat")]
            stats: CombinerStats::new(),
            _relax: PhantomData,
        })
    }

    #[inline]
    fn local_node(&self) -> NodeId {
        *self.local.get_or(|| self.queue.alloc())
    }

    /// Publishes intent and waits out the readers already inside. Caller
    /// holds the base lock.
    fn exclude_readers(&self) {
        self.writer_intent.store(true, SeqCst);
        self.indicator.wait_empty::<R>(self.bounds);
    }

    fn acquire_write(&self) {
        wait_while::<R>(self.bounds, || self.write_barrier.load(Acquire) > 0);
        self.base.lock();
        self.exclude_readers();
    }

    unsafe fn release_write(&self) {
        self.writer_intent.store(false, Release);
        self.base.unlock();
    }

    pub fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        let mut delegated = Delegated::new(op);
        let id = self.local_node();
        let opened = unsafe { self.queue.submit(id, Request::erase(&mut delegated)) };
        if opened || self.queue.wait::<R>(id, self.bounds) == Signal::HandOff {
            self.combine();
        }
        delegated.into_result()
    }

    /// Queues `op` and returns without waiting, unless the queue was idle:
    /// then the caller drains it, `op` included, before returning.
    pub fn delegate_detached(&self, op: impl FnOnce() + Send + 'static) {
        if self.queue.submit_detached(op) {
            self.combine();
        }
    }

    pub fn delegate_or_lock<F: FnOnce() + Send + 'static>(&self, op: F) -> Option<F> {
        wait_while::<R>(self.bounds, || self.write_barrier.load(Acquire) > 0);
        if self.base.try_lock() {
            self.exclude_readers();
            return Some(op);
        }
        self.delegate_detached(op);
        None
    }

    fn combine(&self) {
        self.acquire_write();
        #[cfg(feature = "combiner_stat")]
        let begin = self.stats.now();

        let _served = unsafe { self.queue.serve::<R>(self.max_batch, self.bounds) };

        #[cfg(feature = "combiner_stat")]
        self.stats.record(begin, _served);
        unsafe { self.release_write() };
    }

    /// Runs `op` in parallel with other readers unless a writer has published
    /// intent, in which case `op` is delegated like a write.
    pub fn read<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        let token = self.indicator.arrive();
        if !self.writer_intent.load(SeqCst) {
            let _departing = Departing {
                indicator: &self.indicator,
                token: Some(token),
            };
            return op();
        }
        self.indicator.depart(token);
        self.delegate(op)
    }

    /// Registered readers at scan time. Advisory.
    pub fn readers(&self) -> usize {
        self.indicator.readers()
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> bool {
        !self.queue.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn write_barrier(&self) -> usize {
        self.write_barrier.load(Acquire)
    }

    #[cfg(test)]
    pub(crate) fn writer_intent(&self) -> bool {
        self.writer_intent.load(SeqCst)
    }

    #[cfg(feature = "combiner_stat")]
    pub fn combiner_stat(&self) -> Option<CombinerStat> {
        self.stats.current_thread()
    }

    #[cfg(feature = "combiner_stat")]
    pub fn combiner_total(&self) -> CombinerStat {
        self.stats.total()
    }
}

impl<B: RawLock, R: Relax> RawLock for MrqdLock<B, R> {
    fn lock(&self) {
        self.acquire_write();
    }

    unsafe fn unlock(&self) {
        self.release_write();
    }

    fn try_lock(&self) -> bool {
        if self.write_barrier.load(Acquire) > 0 || !self.base.try_lock() {
            return false;
        }
        self.exclude_readers();
        true
    }

    fn is_locked(&self) -> bool {
        self.base.is_locked() || !self.queue.is_empty() || !self.indicator.is_empty()
    }

    fn lock_shared(&self) {
        let mut rounds = 0;
        let mut raised = false;
        let mut relax = R::new(self.bounds);
        loop {
            let token = self.indicator.arrive();
            if !self.writer_intent.load(SeqCst) {
                // handed back by `unlock_shared`
                std::mem::forget(token);
                break;
            }
            self.indicator.depart(token);
            while self.writer_intent.load(Acquire) {
                relax.relax();
                rounds += 1;
                if !raised && rounds >= self.read_patience {
                    self.write_barrier.fetch_add(1, AcqRel);
                    raised = true;
                    log::trace!("reader out of patience after {} rounds, raising write barrier", rounds);
                }
            }
        }
        if raised {
            self.write_barrier.fetch_sub(1, Release);
        }
    }

    unsafe fn unlock_shared(&self) {
        self.indicator.depart(self.indicator.held_token());
    }

    fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        MrqdLock::delegate(self, op)
    }

    fn delegate_detached(&self, op: impl FnOnce() + Send + 'static) {
        MrqdLock::delegate_detached(self, op)
    }

    fn delegate_or_lock<F: FnOnce() + Send + 'static>(&self, op: F) -> Option<F> {
        MrqdLock::delegate_or_lock(self, op)
    }

    fn read<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        MrqdLock::read(self, op)
    }
}

impl<B, R> Drop for MrqdLock<B, R> {
    fn drop(&mut self) {
        debug_assert!(
            std::thread::panicking() || (self.queue.is_empty() && self.indicator.is_empty()),
            "MRQD lock finalized while in use"
        );
    }
}
