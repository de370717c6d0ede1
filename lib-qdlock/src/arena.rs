//! Lock-owned storage for queue nodes.
//!
//! Queue links are `NodeId`s into the arena of the lock that owns them, so a
//! successor is handed over by exchanging an index, never by aliasing a node
//! that lives on another thread's stack. Nodes are freed together with the
//! arena, i.e. when the lock is finalized.

use std::{
    marker::PhantomData,
    ptr::{self, null_mut},
    sync::atomic::{AtomicPtr, AtomicU32, Ordering::*},
};

use crate::error::{try_vec, Result};

pub(crate) type NodeId = u32;
pub(crate) const NIL: NodeId = u32::MAX;

const FIRST_BUCKET_BITS: u32 = 3;
const FIRST_BUCKET: usize = 1 << FIRST_BUCKET_BITS;
const BUCKETS: usize = 24;
const CAPACITY: usize = FIRST_BUCKET * ((1 << BUCKETS) - 1);

/// Append-only arena of lazily allocated, geometrically growing buckets.
/// Slots are never reused while the arena is alive.
pub(crate) struct NodeArena<N> {
    buckets: [AtomicPtr<N>; BUCKETS],
    next: AtomicU32,
    what: &'static str,
    _owns: PhantomData<Box<[N]>>,
}

#[inline]
fn locate(id: NodeId) -> (usize, usize) {
    let i = id as usize + FIRST_BUCKET;
    let high_bit = usize::BITS - 1 - i.leading_zeros();
    let bucket = (high_bit - FIRST_BUCKET_BITS) as usize;
    (bucket, i - (1 << high_bit))
}

#[inline]
fn bucket_len(bucket: usize) -> usize {
    FIRST_BUCKET << bucket
}

impl<N: Default> NodeArena<N> {
    /// Reserves the first bucket up front so initialization reports
    /// allocation failure instead of the first `lock` call aborting.
    pub(crate) fn new(what: &'static str) -> Result<Self> {
        let arena = Self {
            buckets: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
            next: AtomicU32::new(0),
            what,
            _owns: PhantomData,
        };
        let mut first = try_vec::<N>(what, bucket_len(0))?;
        first.resize_with(bucket_len(0), N::default);
        arena.buckets[0].store(Box::into_raw(first.into_boxed_slice()) as *mut N, Release);
        Ok(arena)
    }

    /// Hands out a fresh slot.
    pub(crate) fn alloc(&self) -> NodeId {
        let id = self.next.fetch_add(1, Relaxed);
        assert!(
            (id as usize) < CAPACITY,
            "{} arena exhausted after {} nodes",
            self.what,
            CAPACITY
        );
        let (bucket, _) = locate(id);
        if self.buckets[bucket].load(Acquire).is_null() {
            self.grow(bucket);
        }
        id
    }

    #[cold]
    fn grow(&self, bucket: usize) {
        let len = bucket_len(bucket);
        let mut nodes = Vec::with_capacity(len);
        nodes.resize_with(len, N::default);
        let fresh = Box::into_raw(nodes.into_boxed_slice()) as *mut N;
        match self.buckets[bucket].compare_exchange(null_mut(), fresh, AcqRel, Acquire) {
            Ok(_) => log::trace!("{} arena grew to {} buckets", self.what, bucket + 1),
            // another thread won the race for this bucket
            Err(_) => unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len))) },
        }
    }
}

impl<N> NodeArena<N> {
    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &N {
        debug_assert_ne!(id, NIL, "dereferenced the nil node");
        let (bucket, offset) = locate(id);
        let base = self.buckets[bucket].load(Acquire);
        debug_assert!(!base.is_null(), "node {} was never allocated", id);
        unsafe { &*base.add(offset) }
    }

    /// Number of slots handed out so far.
    pub(crate) fn allocated(&self) -> usize {
        self.next.load(Relaxed) as usize
    }
}

impl<N> Drop for NodeArena<N> {
    fn drop(&mut self) {
        for (bucket, slot) in self.buckets.iter_mut().enumerate() {
            let base = *slot.get_mut();
            if !base.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        base,
                        bucket_len(bucket),
                    )));
                }
            }
        }
    }
}

impl<N> std::fmt::Debug for NodeArena<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeArena")
            .field("what", &self.what)
            .field("allocated", &self.allocated())
            .finish()
    }
}
