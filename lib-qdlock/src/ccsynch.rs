//! CC-Synch combining lock (Fatourou & Kallimanis, PPoPP '12).
//!
//! Every request swaps a fresh node onto the tail and parks its operation in
//! the node it got back. The thread whose node is released without being
//! completed becomes the combiner and serves the list in arrival order, at
//! most `max_batch` requests, then wakes the first unserved node.

use std::{
    cell::Cell,
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering::*},
};

use crossbeam::utils::CachePadded;
use derivative::Derivative;
use thread_local::ThreadLocal;

#[cfg(feature = "combiner_stat")]
use crate::combiner_stat::{CombinerStat, CombinerStats};
use crate::{
    arena::{NodeArena, NodeId, NIL},
    config::{BackoffBounds, LockConfig},
    error::Result,
    lock::RawLock,
    relax::{wait_while, ExpBackoff, Relax},
    request::{Delegated, Request},
};

use self::node::Node;

mod node;

struct ThreadData {
    /// Node this thread will swap onto the tail next time.
    spare: Cell<NodeId>,
    /// Node through which this thread currently holds the lock.
    held: Cell<NodeId>,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct CCSynch<R = ExpBackoff> {
    tail: CachePadded<AtomicU32>,
    nodes: NodeArena<CachePadded<Node>>,
    #[derivative(Debug = "ignore")]
    local: ThreadLocal<ThreadData>,
    max_batch: usize,
    bounds: BackoffBounds,
    #[cfg(feature = "combiner_stat")]
    stats: CombinerStats,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> CCSynch<R> {
    pub fn with_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        let nodes = NodeArena::new("ccsynch nodes")?;
        // the initial tail is free to be claimed
        let dummy = nodes.alloc();
        Ok(Self {
            tail: CachePadded::new(AtomicU32::new(dummy)),
            nodes,
            local: ThreadLocal::new(),
            max_batch: config.max_batch,
            bounds: config.backoff(),
            #[cfg(feature = "combiner_stat")]
            stats: CombinerStats::new(),
            _relax: PhantomData,
        })
    }

    #[inline]
    fn thread_data(&self) -> &ThreadData {
        self.local.get_or(|| ThreadData {
            spare: Cell::new(self.nodes.alloc()),
            held: Cell::new(NIL),
        })
    }

    #[inline]
    fn reset(&self, id: NodeId) {
        let node = self.nodes.get(id);
        node.next.store(NIL, Relaxed);
        node.wait.store(true, Relaxed);
        node.completed.store(false, Relaxed);
    }

    /// Parks `request` in the node taken from the tail and returns that node.
    fn enqueue(&self, data: &ThreadData, request: Option<Request>) -> NodeId {
        let next_id = data.spare.get();
        self.reset(next_id);

        let cur_id = self.tail.swap(next_id, AcqRel);
        let cur = self.nodes.get(cur_id);
        unsafe {
            *cur.request.get() = request;
        }
        cur.next.store(next_id, Release);
        data.spare.set(cur_id);
        cur_id
    }

    /// Serves the list from `start`, whose owner is the caller, then passes
    /// the combiner role to the first node left unserved.
    fn combine(&self, start: NodeId) {
        #[cfg(feature = "combiner_stat")]
        let begin = self.stats.now();

        let mut served = 0;
        let mut tmp_id = start;
        loop {
            let tmp = self.nodes.get(tmp_id);
            let next_id = tmp.next.load(Acquire);
            if next_id == NIL || served == self.max_batch {
                break;
            }
            match unsafe { (*tmp.request.get()).take() } {
                Some(request) => {
                    unsafe { request.run() };
                    served += 1;
                }
                // the caller's own critical section
                None if tmp_id == start => {}
                // a plain `lock` waiter: hand it the lock
                None => break,
            }
            if tmp_id != start {
                tmp.completed.store(true, Relaxed);
                tmp.wait.store(false, Release);
            }
            tmp_id = next_id;
        }
        self.nodes.get(tmp_id).wait.store(false, Release);

        #[cfg(feature = "combiner_stat")]
        self.stats.record(begin, served);
    }

    pub fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        let mut delegated = Delegated::new(op);
        let data = self.thread_data();
        let cur_id = self.enqueue(data, Some(unsafe { Request::erase(&mut delegated) }));
        let cur = self.nodes.get(cur_id);

        wait_while::<R>(self.bounds, || cur.wait.load(Acquire));

        if !cur.completed.load(Acquire) {
            self.combine(cur_id);
        }
        delegated.into_result()
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

impl<R: Relax> RawLock for CCSynch<R> {
    fn lock(&self) {
        let data = self.thread_data();
        let cur_id = self.enqueue(data, None);
        let cur = self.nodes.get(cur_id);
        wait_while::<R>(self.bounds, || cur.wait.load(Acquire));
        debug_assert!(!cur.completed.load(Relaxed));
        data.held.set(cur_id);
    }

    unsafe fn unlock(&self) {
        let held = self.thread_data().held.replace(NIL);
        debug_assert_ne!(held, NIL, "unlock of a CCSynch lock not held by this thread");
        self.combine(held);
    }

    fn try_lock(&self) -> bool {
        let data = self.thread_data();
        let cur_id = self.tail.load(Acquire);
        let cur = self.nodes.get(cur_id);
        if cur.wait.load(Acquire) {
            return false;
        }
        let next_id = data.spare.get();
        self.reset(next_id);
        if self
            .tail
            .compare_exchange(cur_id, next_id, AcqRel, Relaxed)
            .is_err()
        {
            return false;
        }
        unsafe {
            *cur.request.get() = None;
        }
        cur.next.store(next_id, Release);
        data.spare.set(cur_id);
        // The node may have been recycled onto the tail between the check
        // and the swap; then we are queued like any other waiter.
        wait_while::<R>(self.bounds, || cur.wait.load(Acquire));
        data.held.set(cur_id);
        true
    }

    #[inline]
    fn is_locked(&self) -> bool {
        let tail = self.tail.load(Acquire);
        self.nodes.get(tail).wait.load(Acquire)
    }

    fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        CCSynch::delegate(self, op)
    }

    /// A queued request's owner may have to take over combining, so it
    /// cannot leave early: `op` has run when this returns `None`.
    fn delegate_or_lock<F: FnOnce() + Send + 'static>(&self, op: F) -> Option<F> {
        if RawLock::try_lock(self) {
            return Some(op);
        }
        self.delegate_detached(op);
        None
    }
}

impl<R> Drop for CCSynch<R> {
    fn drop(&mut self) {
        debug_assert!(
            std::thread::panicking()
                || !self.nodes.get(*self.tail.get_mut()).wait.load(Relaxed),
            "CCSynch lock finalized while held"
        );
    }
}
