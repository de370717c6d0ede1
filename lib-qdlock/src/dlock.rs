//! Protected data paired with a raw lock.

use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use crate::{
    config::LockConfig,
    error::Result,
    lock::{LockKind, LockType, RawLock},
    syncptr::SyncMutPtr,
};

pub struct DLock<T, L = LockType> {
    lock: L,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send, L: RawLock> Send for DLock<T, L> {}
unsafe impl<T: Send + Sync, L: RawLock> Sync for DLock<T, L> {}

impl<T> DLock<T, LockType> {
    pub fn initialize(kind: LockKind, data: T, config: &LockConfig) -> Result<Self> {
        Ok(Self::new(LockType::initialize(kind, config)?, data))
    }
}

impl<T, L: RawLock> DLock<T, L> {
    pub fn new(lock: L, data: T) -> Self {
        Self {
            lock,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> DLockGuard<'_, T, L> {
        self.lock.lock();
        DLockGuard::new(self)
    }

    pub fn try_lock(&self) -> Option<DLockGuard<'_, T, L>> {
        self.lock.try_lock().then(|| DLockGuard::new(self))
    }

    pub fn read_lock(&self) -> DLockReadGuard<'_, T, L> {
        self.lock.lock_shared();
        DLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Applies `op` to the data under mutual exclusion. For the combining
    /// kinds `op` usually runs on whichever thread is combining.
    pub fn delegate<R: Send>(&self, op: impl FnOnce(&mut T) -> R + Send) -> R
    where
        T: Send,
    {
        let data = SyncMutPtr::from(self.data.get());
        self.lock.delegate(move || op(unsafe { data.as_mut() }))
    }

    /// Submits `op` without waiting for its completion; see
    /// [`RawLock::delegate_detached`].
    pub fn delegate_detached(&self, op: impl FnOnce(&mut T) + Send + 'static)
    where
        T: Send + 'static,
    {
        // A queued request always has a drainer borrowing this lock, so the
        // data outlives it.
        let data = SyncMutPtr::from(self.data.get());
        self.lock
            .delegate_detached(move || op(unsafe { data.as_mut() }))
    }

    /// Either queues `op` detached and returns `None`, or acquires the lock,
    /// runs `op` on this thread and returns the still held guard.
    pub fn delegate_or_lock(
        &self,
        op: impl FnOnce(&mut T) + Send + 'static,
    ) -> Option<DLockGuard<'_, T, L>>
    where
        T: Send + 'static,
    {
        let data = SyncMutPtr::from(self.data.get());
        let op = self
            .lock
            .delegate_or_lock(move || op(unsafe { data.as_mut() }))?;
        let guard = DLockGuard::new(self);
        op();
        Some(guard)
    }

    pub fn read<R: Send>(&self, op: impl FnOnce(&T) -> R + Send) -> R
    where
        T: Send + Sync,
    {
        let data = SyncMutPtr::from(self.data.get());
        self.lock.read(move || op(unsafe { data.as_ref() }))
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn raw(&self) -> &L {
        &self.lock
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Finalizes the lock and hands back the data.
    pub fn into_inner(self) -> T {
        debug_assert!(!self.lock.is_locked(), "lock finalized while held");
        self.data.into_inner()
    }
}

impl<T, L: fmt::Debug> fmt::Debug for DLock<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DLock")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Exclusive access; released on drop, on the acquiring thread.
pub struct DLockGuard<'a, T, L: RawLock> {
    lock: &'a DLock<T, L>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync, L: RawLock> Sync for DLockGuard<'_, T, L> {}

impl<'a, T, L: RawLock> DLockGuard<'a, T, L> {
    fn new(lock: &'a DLock<T, L>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<T, L: RawLock> Deref for DLockGuard<'_, T, L> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, L: RawLock> DerefMut for DLockGuard<'_, T, L> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, L: RawLock> Drop for DLockGuard<'_, T, L> {
    fn drop(&mut self) {
        unsafe { self.lock.lock.unlock() }
    }
}

/// Shared access; other readers may hold the data at the same time for the
/// kinds that share reads.
pub struct DLockReadGuard<'a, T, L: RawLock> {
    lock: &'a DLock<T, L>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync, L: RawLock> Sync for DLockReadGuard<'_, T, L> {}

impl<T, L: RawLock> Deref for DLockReadGuard<'_, T, L> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, L: RawLock> Drop for DLockReadGuard<'_, T, L> {
    fn drop(&mut self) {
        unsafe { self.lock.lock.unlock_shared() }
    }
}
