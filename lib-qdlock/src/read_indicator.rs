//! Scalable "is any reader active" detector.
//!
//! Readers are spread over cache-padded arrival counters by a per-thread id,
//! so concurrent readers on different slots never touch the same line.
//! Only a writer scans all slots.
//!
//! Every arrival and every scan load is `SeqCst`. Together with the `SeqCst`
//! intent flag of the lock using the indicator this gives the handshake
//! "publish intent, then scan" for writers and "register, then check intent"
//! for readers: at least one side observes the other.

use std::sync::atomic::{AtomicUsize, Ordering::*};

use crossbeam::utils::CachePadded;

use crate::{
    config::BackoffBounds,
    error::{try_vec, Result},
    owner::thread_token,
    relax::{wait_while, Relax},
};

#[derive(Debug)]
pub struct ReadIndicator {
    slots: Box<[CachePadded<AtomicUsize>]>,
}

/// Proof of a registered arrival; must be handed back to `depart`.
#[derive(Debug)]
#[must_use = "a reader that never departs blocks writers forever"]
pub struct ReadToken {
    slot: usize,
}

impl ReadIndicator {
    pub fn new(shard_count: usize) -> Result<Self> {
        let mut slots = try_vec("read indicator slots", shard_count)?;
        slots.resize_with(shard_count, || CachePadded::new(AtomicUsize::new(0)));
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn arrive(&self) -> ReadToken {
        let slot = thread_token() % self.slots.len();
        self.slots[slot].fetch_add(1, SeqCst);
        ReadToken { slot }
    }

    /// Token of an arrival made earlier by the calling thread, for holds that
    /// are released without carrying the token along.
    #[inline]
    pub(crate) fn held_token(&self) -> ReadToken {
        ReadToken {
            slot: thread_token() % self.slots.len(),
        }
    }

    #[inline]
    pub fn depart(&self, token: ReadToken) {
        let previous = self.slots[token.slot].fetch_sub(1, Release);
        debug_assert!(previous > 0, "read indicator slot underflow");
    }

    /// Snapshot; may be stale the moment it returns.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.load(SeqCst) == 0)
    }

    /// Sum of all slots at scan time.
    pub fn readers(&self) -> usize {
        self.slots.iter().map(|slot| slot.load(SeqCst)).sum()
    }

    /// Spins until every slot has been observed at zero. Readers arriving
    /// behind the scan are the caller's business (they must see its intent).
    pub fn wait_empty<R: Relax>(&self, bounds: BackoffBounds) {
        for slot in self.slots.iter() {
            wait_while::<R>(bounds, || slot.load(SeqCst) > 0);
        }
    }
}
