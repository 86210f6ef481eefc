//! Object store port shared by the batch scheduler and the item processor.
//!
//! Implementations live in `s3_store` (remote bucket) and `local_store`
//! (directory-backed bucket).

use crate::models::object::{ObjectInfo, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{io, pin::Pin};
use thiserror::Error;

/// Streamed object payload.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("{operation} failed: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal list/get/put surface over a single bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate every object whose key starts with `prefix`.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>>;

    /// Open an object's payload as a stream.
    async fn get_object(&self, key: &str) -> StoreResult<ByteStream>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, body: ByteStream) -> StoreResult<StoredObject>;
}

/// Drain a byte stream into one contiguous buffer.
pub async fn collect_stream(mut body: ByteStream) -> io::Result<Bytes> {
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
