use std::fmt::{self, Display};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter, EnumString};

#[cfg(feature = "combiner_stat")]
use crate::combiner_stat::CombinerStat;
use crate::{
    ccsynch::CCSynch, config::LockConfig, drmcs::DrmcsLock, error::Result, mcs::McsLock,
    mrqd::MrqdLock, qd::QdLock, request::run_detached, tatas::TatasLock,
};

/// The capability every lock in this crate provides.
///
/// `unlock` and `unlock_shared` are unsafe: the calling thread must hold the
/// lock in the matching mode. Queue locks track their holder per thread, so
/// the release has to happen on the thread that acquired.
#[enum_dispatch]
pub trait RawLock: Send + Sync {
    /// Blocks until the calling thread holds the lock exclusively.
    fn lock(&self);

    /// # Safety
    /// The calling thread holds the lock exclusively.
    unsafe fn unlock(&self);

    /// Acquires the lock if that needs no waiting on other holders.
    fn try_lock(&self) -> bool;

    /// Advisory snapshot, may be stale the instant it returns.
    fn is_locked(&self) -> bool;

    fn lock_shared(&self) {
        self.lock();
    }

    /// # Safety
    /// The calling thread holds the lock in shared mode.
    unsafe fn unlock_shared(&self) {
        self.unlock();
    }

    /// Runs `op` under mutual exclusion with every other critical section of
    /// this lock, possibly on another thread, and returns its result. A panic
    /// of `op` is re-raised here.
    fn delegate<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        self.lock();
        let _held = Held {
            lock: self,
            shared: false,
        };
        op()
    }

    /// Submits `op` without waiting for it to run. Kinds with a delegation
    /// queue return as soon as another thread is bound to execute it; the
    /// others run it before returning. A panic of `op` is logged, not
    /// re-raised.
    fn delegate_detached(&self, op: impl FnOnce() + Send + 'static) {
        self.delegate(move || run_detached(op));
    }

    /// Either acquires the lock exclusively and hands `op` back unrun, or
    /// queues `op` for detached execution and returns `None`. The caller of a
    /// `Some` result holds the lock and must `unlock` it.
    fn delegate_or_lock<F: FnOnce() + Send + 'static>(&self, op: F) -> Option<F> {
        self.lock();
        Some(op)
    }

    /// Runs `op` excluding writers only.
    fn read<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        self.lock_shared();
        let _held = Held {
            lock: self,
            shared: true,
        };
        op()
    }
}

struct Held<'a, L: RawLock + ?Sized> {
    lock: &'a L,
    shared: bool,
}

impl<L: RawLock + ?Sized> Drop for Held<'_, L> {
    fn drop(&mut self) {
        unsafe {
            if self.shared {
                self.lock.unlock_shared();
            } else {
                self.lock.unlock();
            }
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Tatas,
    Mcs,
    CCSynch,
    Drmcs,
    Qd,
    Mrqd,
}

impl LockKind {
    /// Whether the kind can run readers in parallel.
    pub fn shares_reads(self) -> bool {
        matches!(self, LockKind::Drmcs | LockKind::Mrqd)
    }

    pub fn combines(self) -> bool {
        matches!(self, LockKind::CCSynch | LockKind::Qd | LockKind::Mrqd)
    }
}

#[enum_dispatch(RawLock)]
#[derive(Debug)]
pub enum LockType {
    Tatas(TatasLock),
    Mcs(McsLock),
    CCSynch(CCSynch),
    Drmcs(DrmcsLock),
    Qd(QdLock),
    Mrqd(MrqdLock),
}

impl LockType {
    pub fn initialize(kind: LockKind, config: &LockConfig) -> Result<Self> {
        let lock = match kind {
            LockKind::Tatas => LockType::Tatas(TatasLock::with_config(config)?),
            LockKind::Mcs => LockType::Mcs(McsLock::with_config(config)?),
            LockKind::CCSynch => LockType::CCSynch(CCSynch::with_config(config)?),
            LockKind::Drmcs => LockType::Drmcs(DrmcsLock::with_config(config)?),
            LockKind::Qd => LockType::Qd(QdLock::with_config(config)?),
            LockKind::Mrqd => LockType::Mrqd(MrqdLock::with_config(config)?),
        };
        log::debug!("initialized {} lock with {:?}", kind, config);
        Ok(lock)
    }

    pub fn kind(&self) -> LockKind {
        match self {
            LockType::Tatas(_) => LockKind::Tatas,
            LockType::Mcs(_) => LockKind::Mcs,
            LockType::CCSynch(_) => LockKind::CCSynch,
            LockType::Drmcs(_) => LockKind::Drmcs,
            LockType::Qd(_) => LockKind::Qd,
            LockType::Mrqd(_) => LockKind::Mrqd,
        }
    }

    /// Releases every resource of the lock. Must not be held.
    pub fn finalize(self) {
        debug_assert!(!self.is_locked(), "{} lock finalized while held", self);
        log::debug!("finalized {} lock", self);
    }

    /// Combining statistics of the calling thread; `None` for kinds that
    /// never combine or if this thread never did.
    #[cfg(feature = "combiner_stat")]
    pub fn combiner_stat(&self) -> Option<CombinerStat> {
        match self {
            LockType::CCSynch(lock) => lock.combiner_stat(),
            LockType::Qd(lock) => lock.combiner_stat(),
            LockType::Mrqd(lock) => lock.combiner_stat(),
            _ => None,
        }
    }

    #[cfg(feature = "combiner_stat")]
    pub fn combiner_total(&self) -> Option<CombinerStat> {
        match self {
            LockType::CCSynch(lock) => Some(lock.combiner_total()),
            LockType::Qd(lock) => Some(lock.combiner_total()),
            LockType::Mrqd(lock) => Some(lock.combiner_total()),
            _ => None,
        }
    }
}

impl Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::Tatas(_) => write!(f, "TATAS"),
            LockType::Mcs(_) => write!(f, "MCS"),
            LockType::CCSynch(_) => write!(f, "CC-Synch"),
            LockType::Drmcs(_) => write!(f, "DR-MCS"),
            LockType::Qd(_) => write!(f, "QD"),
            LockType::Mrqd(_) => write!(f, "MR-QD"),
        }
    }
}
