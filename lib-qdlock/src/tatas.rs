use std::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, Ordering::*},
};

use crossbeam::utils::CachePadded;
use lock_api::GuardNoSend;

use crate::{
    config::{BackoffBounds, LockConfig},
    error::Result,
    lock::RawLock,
    owner::Owner,
    relax::{ExpBackoff, Relax},
};

/// Test-and-test-and-set spin lock with bounded exponential backoff between
/// acquire attempts. Cheapest option at low contention; unfair.
#[derive(Debug)]
pub struct TatasLock<R = ExpBackoff> {
    flag: CachePadded<AtomicBool>,
    bounds: BackoffBounds,
    owner: Owner,
    _relax: PhantomData<fn() -> R>,
}

pub type TatasMutex<T> = lock_api::Mutex<TatasLock, T>;
pub type TatasMutexGuard<'a, T> = lock_api::MutexGuard<'a, TatasLock, T>;

impl<R: Relax> TatasLock<R> {
    pub const fn new() -> Self {
        Self::with_bounds(BackoffBounds::DEFAULT)
    }

    pub const fn with_bounds(bounds: BackoffBounds) -> Self {
        Self {
            flag: CachePadded::new(AtomicBool::new(false)),
            bounds,
            owner: Owner::new(),
            _relax: PhantomData,
        }
    }

    pub fn with_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_bounds(config.backoff()))
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let acquired = !self.flag.load(Relaxed) && !self.flag.swap(true, Acquire);
        if acquired {
            self.owner.acquired();
        }
        acquired
    }

    #[inline]
    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }
        let mut relax = R::new(self.bounds);
        loop {
            while self.flag.load(Relaxed) {
                relax.relax();
            }
            if !self.flag.swap(true, Acquire) {
                self.owner.acquired();
                return;
            }
            relax.relax();
        }
    }

    /// # Safety
    /// The calling context must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        debug_assert!(self.flag.load(Relaxed), "unlock of an unlocked TATAS lock");
        self.owner.released("TATAS");
        self.flag.store(false, Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Acquire)
    }
}

impl<R: Relax> Default for TatasLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> RawLock for TatasLock<R> {
    #[inline]
    fn lock(&self) {
        TatasLock::lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        TatasLock::unlock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        TatasLock::try_lock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        TatasLock::is_locked(self)
    }
}

unsafe impl<R: Relax> lock_api::RawMutex for TatasLock<R> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    // unlock is checked against the acquiring thread
    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        TatasLock::lock(self)
    }

    fn try_lock(&self) -> bool {
        TatasLock::try_lock(self)
    }

    unsafe fn unlock(&self) {
        TatasLock::unlock(self)
    }

    fn is_locked(&self) -> bool {
        TatasLock::is_locked(self)
    }
}
