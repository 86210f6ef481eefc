use crate::services::{codec::CodecError, object_store::StoreError};
use std::io;
use thiserror::Error;

/// Failure of a single item. The original object is left untouched because
/// the store is only written by the final publish step.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("staging failed: {0}")]
    Staging(#[source] io::Error),
    #[error("download failed: {0}")]
    Download(#[source] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("publish failed: {0}")]
    Publish(#[source] StoreError),
    #[error("optimizer task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Errors that end the whole batch before any item is dispatched.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("listing objects under prefix `{prefix}` failed: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },
}
