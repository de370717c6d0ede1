use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to reserve storage for {count} {what}")]
    Allocation { what: &'static str, count: usize },
    #[error("invalid lock configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reserves exactly `count` slots, reporting failure instead of aborting.
pub(crate) fn try_vec<T>(what: &'static str, count: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| Error::Allocation { what, count })?;
    Ok(v)
}
