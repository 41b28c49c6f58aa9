//! Error types for the inbox datastore.

use thiserror::Error;

/// Failure reported by an [`InboxApi`](crate::api::InboxApi) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("Dataset not found: {0}")]
    UnknownDataset(String),
    #[error("Fetch for dataset '{dataset_id}' failed: {source}")]
    Api {
        dataset_id: String,
        #[source]
        source: ApiError,
    },
}
