//! Strategies for the busy-wait loops of every lock in this crate.
//!
//! Locks take the strategy as a type parameter, so a test can swap in a
//! yielding or instrumented strategy without touching the lock protocol.

use std::{hint::spin_loop, thread::yield_now};

use crossbeam::utils::Backoff;

use crate::config::BackoffBounds;

pub trait Relax {
    /// A fresh strategy for one wait episode.
    fn new(bounds: BackoffBounds) -> Self;

    /// Called once per failed check of the awaited condition.
    fn relax(&mut self);
}

/// Bounded exponential backoff: spin `1 << step` times, doubling from
/// `bounds.min` up to `bounds.max`, then yield the time slice on every round.
#[derive(Debug)]
pub struct ExpBackoff {
    step: u32,
    max: u32,
}

impl Relax for ExpBackoff {
    #[inline]
    fn new(bounds: BackoffBounds) -> Self {
        Self {
            step: bounds.min,
            max: bounds.max,
        }
    }

    #[inline]
    fn relax(&mut self) {
        if self.step < self.max {
            for _ in 0..(1u32 << self.step) {
                spin_loop();
            }
            self.step += 1;
        } else {
            yield_now();
        }
    }
}

/// crossbeam's snooze: fixed spin limits, then yields. Ignores the bounds.
#[derive(Debug)]
pub struct Snooze(Backoff);

impl Relax for Snooze {
    #[inline]
    fn new(_: BackoffBounds) -> Self {
        Self(Backoff::new())
    }

    #[inline]
    fn relax(&mut self) {
        self.0.snooze();
    }
}

#[derive(Debug)]
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new(_: BackoffBounds) -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        spin_loop();
    }
}

/// Always yields. Keeps heavily oversubscribed tests from live-locking on
/// preempted lock holders.
#[derive(Debug)]
pub struct Yield;

impl Relax for Yield {
    #[inline(always)]
    fn new(_: BackoffBounds) -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        yield_now();
    }
}

/// Spins on `cond` until it returns false.
#[inline]
pub(crate) fn wait_while<R: Relax>(bounds: BackoffBounds, mut cond: impl FnMut() -> bool) {
    if !cond() {
        return;
    }
    let mut relax = R::new(bounds);
    while cond() {
        relax.relax();
    }
}
