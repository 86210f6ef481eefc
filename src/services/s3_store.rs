//! S3 (or S3-compatible) bucket implementation of [`ObjectStore`].

use crate::{
    models::object::{ObjectInfo, StoredObject},
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult, collect_stream},
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream as S3ByteStream,
};
use std::fmt;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Static access key pair. The secret is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Connection settings for the remote bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Static credentials; when absent the SDK default provider chain is used.
    pub credentials: Option<StaticCredentials>,
    /// Custom endpoint for S3-compatible stores (path-style addressing).
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from explicit settings.
    pub async fn connect(settings: &S3Settings) -> StoreResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(StoreError::Remote {
                operation: "connect",
                message: "bucket name is empty".into(),
            });
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let Some(creds) = &settings.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key.clone(),
                creds.secret_key.clone(),
                None,
                None,
                "image-optimizer",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }
        debug!(bucket = %settings.bucket, region = %settings.region, "S3 client configured");

        Ok(Self::new(
            Client::from_conf(builder.build()),
            settings.bucket.clone(),
        ))
    }
}

fn remote<E, R>(operation: &'static str, err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    StoreError::Remote {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| remote("ListObjectsV2", err))?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                let size_bytes = obj.size().unwrap_or(0).max(0) as u64;
                objects.push(ObjectInfo::new(key, size_bytes));
            }
        }
        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> StoreResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::ObjectNotFound(key.to_string())
                } else {
                    remote("GetObject", err)
                }
            })?;
        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    /// Upload `body` in a single PutObject request.
    ///
    /// The stream is buffered first because PutObject needs a known length;
    /// optimized images are bounded by the size budget.
    async fn put_object(&self, key: &str, body: ByteStream) -> StoreResult<StoredObject> {
        let data = collect_stream(body).await?;
        let size_bytes = data.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("image/jpeg")
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|err| remote("PutObject", err))?;

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        })
    }
}
