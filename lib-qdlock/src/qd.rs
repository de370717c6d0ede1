//! Queue delegation lock (Klaftenegger, Sagonas & Winblad).
//!
//! A base lock guards the critical section; a delegation queue collects the
//! operations of threads that arrive while it is busy. The thread whose
//! submission opened the queue takes the base lock and serves the queue, so
//! most submitters never touch the base lock at all.

use std::marker::PhantomData;

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
    relax::{ExpBackoff, Relax},
    request::{Delegated, Request},
    tatas::TatasLock,
};

#[derive(Derivative)]
#[derivative(Debug(bound = "B: std::fmt::Debug"))]
pub struct QdLock<B = TatasLock, R = ExpBackoff> {
    base: B,
    queue: DelegationQueue,
    #[derivative(Debug = "ignore")]
    local: ThreadLocal<NodeId>,
    max_batch: usize,
    bounds: BackoffBounds,
    #[cfg(feature = "combiner_stat")]
    stats: CombinerStats,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> QdLock<TatasLock<R>, R> {
    pub fn with_config(config: &LockConfig) -> Result<Self> {
        Self::with_base(TatasLock::with_config(config)?, config)
    }
}

impl<B: RawLock, R: Relax> QdLock<B, R> {
    pub fn with_base(base: B, config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base,
            queue: DelegationQueue::new()?,
            local: ThreadLocal::new(),
            max_batch: config.max_batch,
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
        if self.base.try_lock() {
            return Some(op);
        }
        self.delegate_detached(op);
        None
    }

    fn combine(&self) {
        self.base.lock();
        #[cfg(feature = "combiner_stat")]
        let begin = self.stats.now();

        let _served = unsafe { self.queue.serve::<R>(self.max_batch, self.bounds) };

        #[cfg(feature = "combiner_stat")]
        self.stats.record(begin, _served);
        unsafe { self.base.unlock() };
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> bool {
        !self.queue.is_empty()
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

impl<B: RawLock, R: Relax> RawLock for QdLock<B, R> {
    #[inline]
    fn lock(&self) {
        self.base.lock();
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.base.unlock();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.base.try_lock()
    }

    /// Held by a plain locker or a combiner, or requests are queued.
    #[inline]
    fn is_locked(&self) -> bool {
        self.base.is_locked() || !self.queue.is_empty()
    }

    fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        QdLock::delegate(self, op)
    }

    fn delegate_detached(&self, op: impl FnOnce() + Send + 'static) {
        QdLock::delegate_detached(self, op)
    }

    fn delegate_or_lock<F: FnOnce() + Send + 'static>(&self, op: F) -> Option<F> {
        QdLock::delegate_or_lock(self, op)
    }
}

impl<B, R> Drop for QdLock<B, R> {
    fn drop(&mut self) {
        debug_assert!(
            std::thread::panicking() || self.queue.is_empty(),
            "QD lock finalized with queued requests"
        );
    }
}
