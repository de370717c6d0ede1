//! Reader-aware MCS lock, after the fair reader-writer queue lock of
//! Mellor-Crummey & Scott (PPoPP '91).
//!
//! Exclusive and shared requests share one FIFO queue. A run of consecutive
//! shared requests is admitted together: each admitted reader releases the
//! reader queued right behind it. An exclusive request waits until every
//! reader admitted before it has left, tracked by `reader_count` and the
//! `next_writer` hand-off slot.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering::*},
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

const READER: u8 = 0;
const WRITER: u8 = 1;

// node state bits
const BLOCKED: u8 = 1;
const SUCCESSOR_READER: u8 = 2;
const SUCCESSOR_WRITER: u8 = 4;

/// `next_writer` is a node id tagged with a sequence number in the high half,
/// so a reader holding a stale snapshot cannot release a recycled node.
const NO_WRITER: u64 = NIL as u64;

#[derive(Debug)]
pub(crate) struct Node {
    class: AtomicU8,
    state: AtomicU8,
    next: AtomicU32,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            class: AtomicU8::new(READER),
            state: AtomicU8::new(0),
            next: AtomicU32::new(NIL),
        }
    }
}

impl Node {
    #[inline]
    fn blocked(&self) -> bool {
        self.state.load(Acquire) & BLOCKED != 0
    }

    #[inline]
    fn release(&self) {
        self.state.fetch_and(!BLOCKED, Release);
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct DrmcsLock<R = ExpBackoff> {
    tail: CachePadded<AtomicU32>,
    reader_count: CachePadded<AtomicUsize>,
    next_writer: CachePadded<AtomicU64>,
    writer_tag: AtomicU32,
    nodes: NodeArena<CachePadded<Node>>,
    #[derivative(Debug = "ignore")]
    local: ThreadLocal<NodeId>,
    bounds: BackoffBounds,
    owner: Owner,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> DrmcsLock<R> {
    pub fn with_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tail: CachePadded::new(AtomicU32::new(NIL)),
            reader_count: CachePadded::new(AtomicUsize::new(0)),
            next_writer: CachePadded::new(AtomicU64::new(NO_WRITER)),
            writer_tag: AtomicU32::new(0),
            nodes: NodeArena::new("drmcs nodes")?,
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

    fn reset(&self, id: NodeId, class: u8) -> &Node {
        let node = self.nodes.get(id);
        node.class.store(class, Relaxed);
        node.next.store(NIL, Relaxed);
        node.state.store(BLOCKED, Relaxed);
        node
    }

    #[inline]
    fn tagged(&self, id: NodeId) -> u64 {
        let tag = self.writer_tag.fetch_add(1, Relaxed) as u64;
        (tag << 32) | id as u64
    }

    #[inline]
    fn wait_next(&self, node: &Node) -> NodeId {
        let mut next = node.next.load(Acquire);
        wait_while::<R>(self.bounds, || {
            next = node.next.load(Acquire);
            next == NIL
        });
        next
    }

    /// Writer at the head of an empty queue: admitted as soon as the readers
    /// that left the queue before it have departed.
    fn claim_head(&self, id: NodeId, node: &Node) {
        self.next_writer.store(self.tagged(id), SeqCst);
        if self.reader_count.load(SeqCst) == 0
            && self.next_writer.swap(NO_WRITER, SeqCst) as u32 == id
        {
            node.release();
        }
    }

    /// Readers currently admitted. Advisory.
    pub fn readers(&self) -> usize {
        self.reader_count.load(Acquire)
    }
}

impl<R: Relax> RawLock for DrmcsLock<R> {
    fn lock(&self) {
        let id = self.local_node();
        let node = self.reset(id, WRITER);
        let pred = self.tail.swap(id, AcqRel);
        if pred == NIL {
            self.claim_head(id, node);
        } else {
            let pred = self.nodes.get(pred);
            // successor class must be visible before the link
            pred.state.fetch_or(SUCCESSOR_WRITER, Release);
            pred.next.store(id, Release);
        }
        wait_while::<R>(self.bounds, || node.blocked());
        self.owner.acquired();
    }

    unsafe fn unlock(&self) {
        self.owner.released("DRMCS");
        let id = self.local_node();
        let node = self.nodes.get(id);
        debug_assert_eq!(node.class.load(Relaxed), WRITER, "exclusive unlock of a shared hold");
        let mut next = node.next.load(Acquire);
        if next == NIL {
            if self
                .tail
                .compare_exchange(id, NIL, Release, Relaxed)
                .is_ok()
            {
                return;
            }
            next = self.wait_next(node);
        }
        let next = self.nodes.get(next);
        if next.class.load(Relaxed) == READER {
            self.reader_count.fetch_add(1, SeqCst);
        }
        next.release();
    }

    fn try_lock(&self) -> bool {
        if self.tail.load(Relaxed) != NIL || self.reader_count.load(Relaxed) != 0 {
            return false;
        }
        let id = self.local_node();
        let node = self.reset(id, WRITER);
        if self
            .tail
            .compare_exchange(NIL, id, AcqRel, Relaxed)
            .is_err()
        {
            return false;
        }
        self.claim_head(id, node);
        // only readers already on their way out can still hold us back
        wait_while::<R>(self.bounds, || node.blocked());
        self.owner.acquired();
        true
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.tail.load(Acquire) != NIL || self.reader_count.load(Acquire) != 0
    }

    fn lock_shared(&self) {
        let id = self.local_node();
        let node = self.reset(id, READER);
        let pred = self.tail.swap(id, AcqRel);
        if pred == NIL {
            self.reader_count.fetch_add(1, SeqCst);
            node.release();
        } else {
            let pred = self.nodes.get(pred);
            if pred.class.load(Relaxed) == WRITER
                || pred
                    .state
                    .compare_exchange(BLOCKED, BLOCKED | SUCCESSOR_READER, AcqRel, Relaxed)
                    .is_ok()
            {
                // pred counts us in and releases us once it is admitted
                pred.next.store(id, Release);
                wait_while::<R>(self.bounds, || node.blocked());
            } else {
                // pred is an admitted reader: join it
                self.reader_count.fetch_add(1, SeqCst);
                pred.next.store(id, Release);
                node.release();
            }
        }

        if node.state.load(Acquire) & SUCCESSOR_READER != 0 {
            let next = self.wait_next(node);
            self.reader_count.fetch_add(1, SeqCst);
            self.nodes.get(next).release();
        }
    }

    unsafe fn unlock_shared(&self) {
        let id = self.local_node();
        let node = self.nodes.get(id);
        debug_assert_eq!(node.class.load(Relaxed), READER, "shared unlock of an exclusive hold");
        let next = node.next.load(Acquire);
        if next != NIL
            || self
                .tail
                .compare_exchange(id, NIL, Release, Relaxed)
                .is_err()
        {
            let next = self.wait_next(node);
            if node.state.load(Acquire) & SUCCESSOR_WRITER != 0 {
                self.next_writer.store(self.tagged(next), SeqCst);
            }
        }
        if self.reader_count.fetch_sub(1, SeqCst) == 1 {
            let writer = self.next_writer.load(SeqCst);
            if writer as u32 != NIL
                && self.reader_count.load(SeqCst) == 0
                && self
                    .next_writer
                    .compare_exchange(writer, NO_WRITER, SeqCst, SeqCst)
                    .is_ok()
            {
                self.nodes.get(writer as u32).release();
            }
        }
    }
}

impl<R> Drop for DrmcsLock<R> {
    fn drop(&mut self) {
        debug_assert!(
            std::thread::panicking()
                || (*self.tail.get_mut() == NIL && *self.reader_count.get_mut() == 0),
            "DRMCS lock finalized while held"
        );
    }
}
