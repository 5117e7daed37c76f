use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AllocationError {
    /// Caller-correctable input problem; the message is shown to the caller as-is
    #[error("{0}")]
    Validation(String),

    #[error("failed to claim codes from the pool: {0}")]
    PoolClaim(#[source] StorageError),

    #[error("failed to write binding: {0}")]
    BindingWrite(#[source] StorageError),
}

impl AllocationError {
    pub fn validation(message: impl Into<String>) -> Self {
        AllocationError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AllocationError::Validation(_))
    }
}
