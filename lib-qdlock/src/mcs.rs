//! MCS queue lock: every waiter spins on its own node, acquisition order is
//! the order in which waiters swapped themselves onto the tail.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, Ordering::*},
};

use crossbeam::utils::CachePadded;
use derivative::Derivative;
use thread_local::ThreadLocal;

use crate::{
    arena::{NodeArena, NodeId, NIL},
    config::{BackoffBounds, LockConfig},
    error::Result,
    lock::RawLock,
    owner::Owner,
    relax::{wait_while, ExpBackoff, Relax},
};

#[derive(Debug)]
pub(crate) struct McsNode {
    next: AtomicU32,
    locked: AtomicBool,
}

impl Default for McsNode {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(NIL),
            locked: AtomicBool::new(false),
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct McsLock<R = ExpBackoff> {
    tail: CachePadded<AtomicU32>,
    nodes: NodeArena<CachePadded<McsNode>>,
    #[derivative(Debug = "ignore")]
    local: ThreadLocal<NodeId>,
    bounds: BackoffBounds,
    owner: Owner,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> McsLock<R> {
    pub fn with_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tail: CachePadded::new(AtomicU32::new(NIL)),
            nodes: NodeArena::new("mcs nodes")?,
            local: ThreadLocal::new(),
            bounds: config.backoff(),
            owner: Owner::new(),
            _relax: PhantomData,
        })
    }

    #[inline]
    fn local_node(&self) -> NodeId {
        *self.local.get_or(|| self.nodes.alloc())
    }

    #[inline]
    fn reset(&self, id: NodeId) -> &McsNode {
        let node = self.nodes.get(id);
        node.next.store(NIL, Relaxed);
        node.locked.store(true, Relaxed);
        node
    }

    /// Tail slot, used by tests to observe link-in order.
    #[cfg(test)]
    pub(crate) fn tail_slot(&self) -> NodeId {
        self.tail.load(Acquire)
    }

    #[cfg(test)]
    pub(crate) fn local_slot(&self) -> NodeId {
        self.local_node()
    }
}

impl<R: Relax> RawLock for McsLock<R> {
    fn lock(&self) {
        let id = self.local_node();
        let node = self.reset(id);
        let pred = self.tail.swap(id, AcqRel);
        if pred != NIL {
            self.nodes.get(pred).next.store(id, Release);
            wait_while::<R>(self.bounds, || node.locked.load(Acquire));
        }
        self.owner.acquired();
    }

    unsafe fn unlock(&self) {
        self.owner.released("MCS");
        let id = self.local_node();
        let node = self.nodes.get(id);
        let mut next = node.next.load(Acquire);
        if next == NIL {
            if self
                .tail
                .compare_exchange(id, NIL, Release, Relaxed)
                .is_ok()
            {
                return;
            }
            // a successor swapped in but has not linked yet
            wait_while::<R>(self.bounds, || {
                next = node.next.load(Acquire);
                next == NIL
            });
        }
        self.nodes.get(next).locked.store(false, Release);
    }

    fn try_lock(&self) -> bool {
        // our own node may be queued if this thread already holds the lock
        if self.tail.load(Relaxed) != NIL {
            return false;
        }
        let id = self.local_node();
        self.reset(id);
        let acquired = self
            .tail
            .compare_exchange(NIL, id, Acquire, Relaxed)
            .is_ok();
        if acquired {
            self.owner.acquired();
        }
        acquired
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.tail.load(Acquire) != NIL
    }
}

impl<R> Drop for McsLock<R> {
    fn drop(&mut self) {
        debug_assert!(
            std::thread::panicking() || *self.tail.get_mut() == NIL,
            "MCS lock finalized while held"
        );
    }
}
