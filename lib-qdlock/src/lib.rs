//! Delegation locks: a TATAS spin lock, an MCS queue lock, the CC-Synch
//! combining lock, a reader-aware MCS lock and the queue delegation locks QD
//! and MRQD, all behind the [`RawLock`] capability.

mod arena;
pub mod ccsynch;
#[cfg(feature = "combiner_stat")]
pub mod combiner_stat;
pub mod config;
pub mod dlock;
pub mod drmcs;
pub mod error;
pub mod lock;
pub mod mcs;
pub mod mrqd;
mod owner;
pub mod qd;
mod qd_queue;
pub mod read_indicator;
pub mod relax;
mod request;
mod syncptr;
pub mod tatas;
#[cfg(test)]
mod unit_test;

pub use ccsynch::CCSynch;
#[cfg(feature = "combiner_stat")]
pub use combiner_stat::CombinerStat;
pub use config::{BackoffBounds, LockConfig};
pub use dlock::{DLock, DLockGuard, DLockReadGuard};
pub use drmcs::DrmcsLock;
pub use error::{Error, Result};
pub use lock::{LockKind, LockType, RawLock};
pub use mcs::McsLock;
pub use mrqd::MrqdLock;
pub use qd::QdLock;
pub use tatas::{TatasLock, TatasMutex, TatasMutexGuard};
