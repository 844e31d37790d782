//! Error types for the sync layer.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
