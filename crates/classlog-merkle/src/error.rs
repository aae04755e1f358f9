use thiserror::Error;

/// Errors from the storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stream not found: {0}")]
    NotFound(String),
}

/// Errors from the Merkle engine and its async facade.
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("stream not found: {0}")]
    NotFound(String),
    #[error("chain integrity error in '{stream_key}' at item {index}: {detail}")]
    ChainBroken {
        stream_key: String,
        index: usize,
        detail: String,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("blocking task failed: {0}")]
    TaskFailed(String),
}
