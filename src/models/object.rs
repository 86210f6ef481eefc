//! Represents an object (file) listed from the store.

use std::path::Path;

/// File extensions (lowercase, without the dot) treated as optimizable images.
const IMAGE_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// A single entry returned by an object listing.
///
/// Only the key and size are carried; the payload is fetched separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes as reported by the store.
    pub size_bytes: u64,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            size_bytes,
        }
    }

    /// Whether this object should be optimized under the given size threshold.
    ///
    /// The size comparison is strict: an object exactly at the threshold is
    /// already within budget and is left alone.
    pub fn is_candidate(&self, max_size_bytes: u64) -> bool {
        is_image_key(&self.key) && self.size_bytes > max_size_bytes
    }
}

/// Result of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,

    /// Entity tag returned by the store, if it reports one.
    pub etag: Option<String>,
}

/// Case-insensitive check for a JPEG extension on the final path segment.
pub fn is_image_key(key: &str) -> bool {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
