//! Multi-producer, single-consumer request queue shared by the QD locks.
//!
//! Producers append their per-thread node with one `swap` on the tail. The
//! producer that finds the queue empty is responsible for draining it; every
//! other producer spins on its own node until the drainer either served it or
//! handed it the drainer role. Detached requests have no submitter waiting
//! on them, so the drainer serves them past the batch limit and only ever
//! hands off to a waiting request.

use std::{
    cell::{RefCell, UnsafeCell},
    sync::atomic::{AtomicU32, AtomicU8, Ordering::*},
};

use crossbeam::utils::CachePadded;
use thread_local::ThreadLocal;

use crate::{
    arena::{NodeArena, NodeId, NIL},
    config::BackoffBounds,
    error::Result,
    relax::{wait_while, Relax},
    request::Request,
};

const WAITING: u8 = 0;
const DONE: u8 = 1;
const HAND_OFF: u8 = 2;

/// How a queued request left the queue, as seen by its submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Executed by the drainer.
    Done,
    /// Not executed; the submitter is now the drainer.
    HandOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// Every request was served and the queue is closed.
    Empty,
    /// A producer swapped the tail but has not linked its node yet.
    Stalled,
    /// The batch limit was reached with requests left.
    Full,
}

pub(crate) struct QueueNode {
    next: AtomicU32,
    state: AtomicU8,
    request: UnsafeCell<Option<Request>>,
}

// `request` is written by the owner before the node is published on the tail
// and taken by the drainer only after it reached the node through a link.
unsafe impl Sync for QueueNode {}

impl Default for QueueNode {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(NIL),
            state: AtomicU8::new(DONE),
            request: UnsafeCell::new(None),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DelegationQueue {
    tail: CachePadded<AtomicU32>,
    /// Owned by whoever holds the drainer role.
    head: CachePadded<AtomicU32>,
    nodes: NodeArena<CachePadded<QueueNode>>,
    /// Nodes each thread has used for detached requests. A node is free
    /// again once the drainer signalled it.
    detached: ThreadLocal<RefCell<Vec<NodeId>>>,
}

impl DelegationQueue {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            tail: CachePadded::new(AtomicU32::new(NIL)),
            head: CachePadded::new(AtomicU32::new(NIL)),
            nodes: NodeArena::new("delegation queue nodes")?,
            detached: ThreadLocal::new(),
        })
    }

    pub(crate) fn alloc(&self) -> NodeId {
        self.nodes.alloc()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tail.load(Acquire) == NIL
    }

    /// Appends `request` in node `id`. Returns true when the queue was empty,
    /// in which case the caller must drain it.
    ///
    /// # Safety
    /// `id` must be owned by the caller and not currently queued, and the
    /// request must stay valid until the node is signalled.
    pub(crate) unsafe fn submit(&self, id: NodeId, request: Request) -> bool {
        let prev = self.append(id, request);
        self.link(prev, id)
    }

    /// Appends a request nobody waits for, in a node of the calling thread's
    /// detached pool. Returns true when the caller must drain the queue.
    pub(crate) fn submit_detached(&self, op: impl FnOnce() + Send + 'static) -> bool {
        let id = self.free_detached_node();
        // the request owns its operation; no submitter stack is involved
        unsafe { self.submit(id, Request::detached(op)) }
    }

    fn free_detached_node(&self) -> NodeId {
        let mut pool = self.detached.get_or_default().borrow_mut();
        let free = pool
            .iter()
            .copied()
            .find(|&id| self.nodes.get(id).state.load(Acquire) == DONE);
        free.unwrap_or_else(|| {
            let id = self.nodes.alloc();
            pool.push(id);
            id
        })
    }

    /// Swaps `id` onto the tail and returns the previous tail.
    unsafe fn append(&self, id: NodeId, request: Request) -> NodeId {
        let node = self.nodes.get(id);
        node.next.store(NIL, Relaxed);
        node.state.store(WAITING, Relaxed);
        *node.request.get() = Some(request);
        self.tail.swap(id, AcqRel)
    }

    fn link(&self, prev: NodeId, id: NodeId) -> bool {
        if prev == NIL {
            self.head.store(id, Relaxed);
            true
        } else {
            self.nodes.get(prev).next.store(id, Release);
            false
        }
    }

    /// Spins until node `id` is signalled.
    pub(crate) fn wait<R: Relax>(&self, id: NodeId, bounds: BackoffBounds) -> Signal {
        let node = self.nodes.get(id);
        let mut state = node.state.load(Acquire);
        wait_while::<R>(bounds, || {
            state = node.state.load(Acquire);
            state == WAITING
        });
        if state == HAND_OFF {
            Signal::HandOff
        } else {
            Signal::Done
        }
    }

    /// Serves requests from the head in submission order, at most
    /// `max_batch` of them, then either closes the queue or hands the drainer
    /// role to the first unserved request. Returns the number served.
    ///
    /// # Safety
    /// The caller holds the drainer role and whatever exclusion the requests
    /// expect to run under.
    pub(crate) unsafe fn serve<R: Relax>(&self, max_batch: usize, bounds: BackoffBounds) -> usize {
        let mut served = 0;
        let mut relax = R::new(bounds);
        loop {
            match self.drain(max_batch, &mut served) {
                Drain::Empty => return served,
                Drain::Stalled => relax.relax(),
                Drain::Full => {
                    self.hand_off();
                    return served;
                }
            }
        }
    }

    unsafe fn drain(&self, max_batch: usize, served: &mut usize) -> Drain {
        loop {
            let cur_id = self.head.load(Relaxed);
            let cur = self.nodes.get(cur_id);
            // already taken when resuming after a stall
            if let Some(request) = (*cur.request.get()).take() {
                request.run();
                *served += 1;
            }

            let next = cur.next.load(Acquire);
            if next == NIL {
                if self
                    .tail
                    .compare_exchange(cur_id, NIL, AcqRel, Relaxed)
                    .is_err()
                {
                    return Drain::Stalled;
                }
                // The next producer may already own the head.
                cur.state.store(DONE, Release);
                return Drain::Empty;
            }
            self.head.store(next, Relaxed);
            cur.state.store(DONE, Release);
            // The new head is linked and unserved, so a hand-off never
            // reaches a node whose owner already returned.
            if *served >= max_batch && self.awaited(next) {
                return Drain::Full;
            }
        }
    }

    /// Whether a submitter is spinning on the unserved node `id`.
    unsafe fn awaited(&self, id: NodeId) -> bool {
        (*self.nodes.get(id).request.get()).map_or(false, |request| !request.is_detached())
    }

    fn hand_off(&self) {
        let head = self.head.load(Relaxed);
        log::trace!("batch limit reached, handing off to node {}", head);
        self.nodes.get(head).state.store(HAND_OFF, Release);
    }
}
