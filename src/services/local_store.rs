//! src/services/local_store.rs
//!
//! LocalObjectStore: a bucket backed by a plain directory tree. Object keys map
//! directly onto relative paths beneath `root`, so a bucket synced to disk (or a
//! fixture directory) can be optimized in place without a remote store.

use crate::{
    models::object::{ObjectInfo, StoredObject},
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use futures::StreamExt;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Directory acting as the bucket root.
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or oversized keys, absolute keys, `..` segments, and
    /// control characters or backslashes.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidObjectKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(key.split('/').filter(|segment| !segment.is_empty()));
        path
    }

    /// Convert an on-disk path under `root` back into a `/`-separated key.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Walk the tree and return every object under `prefix` in key order.
    ///
    /// In-flight upload temp files are skipped.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file()
                    || entry.file_name().to_string_lossy().starts_with(TMP_PREFIX)
                {
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    debug!("skipping non UTF-8 path {}", path.display());
                    continue;
                };
                if key.starts_with(prefix) {
                    let size_bytes = entry.metadata().await?.len();
                    objects.push(ObjectInfo::new(key, size_bytes));
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> StoreResult<ByteStream> {
        Self::ensure_key_safe(key)?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    /// Stream-upload an object to disk.
    ///
    /// The body lands in a hidden temp file next to the destination and is
    /// renamed over it only once fully written and synced. Any failure after
    /// the temp file exists removes it.
    async fn put_object(&self, key: &str, body: ByteStream) -> StoreResult<StoredObject> {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));

        let written = match spool(&tmp_path, body).await {
            Ok(written) => fs::rename(&tmp_path, &file_path).await.map(|()| written),
            Err(err) => Err(err),
        };
        let (size_bytes, etag) = match written {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };
        debug!("stored {} ({} bytes)", file_path.display(), size_bytes);

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: Some(etag),
        })
    }
}

/// Write `body` to a new file at `path`, returning its size and MD5 hex digest.
async fn spool(path: &Path, mut body: ByteStream) -> io::Result<(u64, String)> {
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}
