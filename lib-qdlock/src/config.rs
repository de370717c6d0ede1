use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Construction-time options shared by every lock kind. Each kind reads the
/// fields it cares about and ignores the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Exponent of the first backoff step: a waiter spins `1 << backoff_min`
    /// times before re-checking.
    pub backoff_min: u32,
    /// Exponent at which backoff stops growing and starts yielding the thread.
    pub backoff_max: u32,
    /// Most requests a combiner serves (its own included) before it hands the
    /// combiner role to the next waiter.
    pub max_batch: usize,
    /// Number of read indicator slots (MRQD).
    pub shard_count: usize,
    /// Relax rounds a blocked shared-mode reader waits before raising the
    /// write barrier (MRQD).
    pub read_patience: u32,
}

pub const MAX_BACKOFF_EXPONENT: u32 = 16;

impl LockConfig {
    pub const DEFAULT: LockConfig = LockConfig {
        backoff_min: 1,
        backoff_max: 8,
        max_batch: 512,
        shard_count: 64,
        read_patience: 1000,
    };

    pub fn validate(&self) -> Result<()> {
        if self.backoff_min > self.backoff_max {
            return Err(Error::InvalidConfig(format!(
                "backoff_min ({}) exceeds backoff_max ({})",
                self.backoff_min, self.backoff_max
            )));
        }
        if self.backoff_max > MAX_BACKOFF_EXPONENT {
            return Err(Error::InvalidConfig(format!(
                "backoff_max ({}) exceeds {}",
                self.backoff_max, MAX_BACKOFF_EXPONENT
            )));
        }
        if self.max_batch == 0 {
            return Err(Error::InvalidConfig("max_batch must be at least 1".into()));
        }
        if self.shard_count == 0 {
            return Err(Error::InvalidConfig(
                "shard_count must be at least 1".into(),
            ));
        }
        if self.read_patience == 0 {
            return Err(Error::InvalidConfig(
                "read_patience must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn backoff(&self) -> BackoffBounds {
        BackoffBounds {
            min: self.backoff_min,
            max: self.backoff_max,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffBounds {
    pub min: u32,
    pub max: u32,
}

impl BackoffBounds {
    pub const DEFAULT: BackoffBounds = BackoffBounds {
        min: LockConfig::DEFAULT.backoff_min,
        max: LockConfig::DEFAULT.backoff_max,
    };
}

impl Default for BackoffBounds {
    fn default() -> Self {
        Self::DEFAULT
    }
}
