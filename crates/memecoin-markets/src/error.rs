//! Cycle failure classification

use thiserror::Error;

/// Why a creation or resolution cycle aborted
#[derive(Error, Debug)]
pub enum CycleError {
    /// Token data provider failed (network, rate limit, malformed response)
    #[error("token provider error: {0:#}")]
    Provider(anyhow::Error),

    /// Market Store failed; fetched data was not persisted
    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),

    #[error("{0}")]
    Internal(String),
}

impl CycleError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, CycleError::Persistence(_))
    }
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;
