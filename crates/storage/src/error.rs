use thiserror::Error;

use skyfeed_core::IngestError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(_) => IngestError::transient(err.to_string()),
            StoreError::InvalidItem(_) | StoreError::Serialize(_) => {
                IngestError::permanent(err.to_string())
            }
        }
    }
}
