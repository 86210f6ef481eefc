//! src/services/processor.rs
//!
//! Processor: optimizes one stored image end to end:
//! download into a private staging file, resize once, walk the JPEG quality
//! down until the encoding fits the size budget, upload over the original key,
//! and remove the staging file on every exit path.

use crate::{
    errors::ProcessError,
    models::{object::StoredObject, report::OptimizedImage},
    services::{
        codec::{CodecError, ImageCodec},
        object_store::ObjectStore,
    },
};
use chrono::Utc;
use futures::StreamExt;
use image::DynamicImage;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 102_400;
pub const DEFAULT_STAGING_DIR: &str = "/tmp/image-optimization";
pub const DEFAULT_MAX_WIDTH: u32 = 1280;
pub const DEFAULT_MAX_HEIGHT: u32 = 720;
pub const INITIAL_QUALITY: u8 = 80;
pub const QUALITY_STEP: u8 = 5;

#[derive(Clone, Debug)]
pub struct ProcessorSettings {
    /// Size budget for the published encoding, in bytes.
    pub max_image_size: u64,
    pub staging_dir: PathBuf,
    /// Bounding box the image is shrunk into before encoding.
    pub max_width: u32,
    pub max_height: u32,
    pub initial_quality: u8,
    pub quality_step: u8,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            initial_quality: INITIAL_QUALITY,
            quality_step: QUALITY_STEP,
        }
    }
}

/// Final encoding chosen by [`converge`].
#[derive(Debug)]
pub struct Converged {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub attempts: u32,
    pub within_budget: bool,
}

/// Encode `image` at decreasing quality until it fits in `max_size` bytes.
///
/// Starts at `initial_quality` and lowers by `step` while over budget, never
/// trying a quality of zero or below. If the floor is reached first the last
/// attempt is returned with `within_budget == false`.
pub fn converge(
    codec: &dyn ImageCodec,
    image: &DynamicImage,
    max_size: u64,
    initial_quality: u8,
    step: u8,
) -> Result<Converged, CodecError> {
    let step = step.max(1);
    let mut quality = initial_quality.clamp(1, 100);
    let mut bytes = codec.encode(image, quality)?;
    let mut attempts = 1;

    while bytes.len() as u64 > max_size && quality > step {
        quality -= step;
        bytes = codec.encode(image, quality)?;
        attempts += 1;
    }

    Ok(Converged {
        within_budget: bytes.len() as u64 <= max_size,
        bytes,
        quality,
        attempts,
    })
}

/// Decode, resize once, then converge on the resized image.
fn optimize(
    codec: &dyn ImageCodec,
    original: &[u8],
    settings: &ProcessorSettings,
) -> Result<Converged, CodecError> {
    let decoded = codec.decode(original)?;
    let resized = codec.resize_to_fit(&decoded, settings.max_width, settings.max_height);
    drop(decoded);
    converge(
        codec,
        &resized,
        settings.max_image_size,
        settings.initial_quality,
        settings.quality_step,
    )
}

/// A task-exclusive staging file.
///
/// `release` removes it on every normal exit path; `Drop` covers unwinding and
/// task cancellation with a synchronous unlink.
#[derive(Debug)]
struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    /// Reserve a unique path inside `dir`, creating `dir` owner-only if needed.
    async fn create(dir: &Path) -> Result<(Self, File), ProcessError> {
        ensure_staging_dir(dir)
            .await
            .map_err(ProcessError::Staging)?;

        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = dir.join(format!("{stamp}-{}.jpg", Uuid::new_v4()));
        let file = File::create(&path).await.map_err(ProcessError::Staging)?;
        Ok((
            Self {
                path,
                released: false,
            },
            file,
        ))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn release(mut self) {
        self.released = true;
        log_removal(&self.path, fs::remove_file(&self.path).await);
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.released {
            log_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("removed staged file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove staged file {}: {}", path.display(), err),
    }
}

async fn ensure_staging_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn ImageCodec>,
    settings: Arc<ProcessorSettings>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            codec,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Optimize the object at `key` and replace it in the store.
    pub async fn process(&self, key: &str) -> Result<OptimizedImage, ProcessError> {
        let (staged, file) = StagedFile::create(&self.settings.staging_dir).await?;
        let result = self.process_staged(key, &staged, file).await;
        staged.release().await;
        result
    }

    async fn process_staged(
        &self,
        key: &str,
        staged: &StagedFile,
        file: File,
    ) -> Result<OptimizedImage, ProcessError> {
        self.download(key, file).await?;

        let original = fs::read(staged.path())
            .await
            .map_err(ProcessError::Staging)?;
        let original_bytes = original.len() as u64;

        let codec = Arc::clone(&self.codec);
        let settings = Arc::clone(&self.settings);
        let converged =
            tokio::task::spawn_blocking(move || optimize(codec.as_ref(), &original, &settings))
                .await??;

        fs::write(staged.path(), &converged.bytes)
            .await
            .map_err(ProcessError::Staging)?;
        debug!(
            key,
            quality = converged.quality,
            attempts = converged.attempts,
            "encoded {} -> {} bytes",
            original_bytes,
            converged.bytes.len()
        );

        let stored = self.publish(key, staged).await?;
        if !converged.within_budget {
            warn!(
                key,
                budget = self.settings.max_image_size,
                size = stored.size_bytes,
                "quality floor reached before size budget; publishing best attempt"
            );
        }
        info!(key, etag = ?stored.etag, "optimized image");

        Ok(OptimizedImage {
            key: key.to_string(),
            original_bytes,
            final_bytes: stored.size_bytes,
            quality: converged.quality,
            attempts: converged.attempts,
            within_budget: converged.within_budget,
        })
    }

    /// Stream the object into the staging file.
    async fn download(&self, key: &str, mut file: File) -> Result<(), ProcessError> {
        let mut body = self
            .store
            .get_object(key)
            .await
            .map_err(ProcessError::Download)?;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ProcessError::Download(err.into()))?;
            file.write_all(&chunk)
                .await
                .map_err(ProcessError::Staging)?;
        }
        file.flush().await.map_err(ProcessError::Staging)?;

        Ok(())
    }

    async fn publish(
        &self,
        key: &str,
        staged: &StagedFile,
    ) -> Result<StoredObject, ProcessError> {
        let file = File::open(staged.path())
            .await
            .map_err(ProcessError::Staging)?;
        self.store
            .put_object(key, Box::pin(ReaderStream::new(file)))
            .await
            .map_err(ProcessError::Publish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        codec::{JpegCodec, testing::FakeCodec},
        local_store::LocalObjectStore,
        object_store::{
            ObjectStore,
            testing::{Call, MemoryStore},
        },
    };
    use image::{GenericImageView, Rgb, RgbImage};
    use tempfile::TempDir;

    fn settings(staging: &TempDir) -> ProcessorSettings {
        ProcessorSettings {
            staging_dir: staging.path().join("staging"),
            ..ProcessorSettings::default()
        }
    }

    fn staged_files(staging: &TempDir) -> usize {
        match std::fs::read_dir(staging.path().join("staging")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[tokio::test]
    async fn staged_file_is_removed_by_release_and_by_drop() {
        let staging = TempDir::new().unwrap();
        let dir = staging.path().join("staging");

        let (released, _file) = StagedFile::create(&dir).await.unwrap();
        let released_path = released.path().to_path_buf();
        assert!(released_path.exists());
        released.release().await;
        assert!(!released_path.exists());

        let (dropped, file) = StagedFile::create(&dir).await.unwrap();
        let dropped_path = dropped.path().to_path_buf();
        drop(file);
        drop(dropped);
        assert!(!dropped_path.exists());
        assert_eq!(staged_files(&staging), 0);
    }

    #[test]
    fn converge_accepts_initial_quality_when_within_budget() {
        let codec = FakeCodec::new(1_000);
        let img = DynamicImage::new_rgb8(4, 3);
        let out = converge(&codec, &img, 102_400, 80, 5).unwrap();

        assert_eq!(out.quality, 80);
        assert_eq!(out.attempts, 1);
        assert!(out.within_budget);
        assert_eq!(codec.qualities(), vec![80]);
    }

    #[test]
    fn converge_steps_down_until_budget_met() {
        let codec = FakeCodec::new(3_000);
        let img = DynamicImage::new_rgb8(4, 3);
        let out = converge(&codec, &img, 102_400, 80, 5).unwrap();

        // 35 * 3000 = 105000 is still over, 30 * 3000 = 90000 fits.
        assert_eq!(out.quality, 30);
        assert_eq!(out.bytes.len(), 90_000);
        assert!(out.within_budget);
        assert_eq!(
            codec.qualities(),
            vec![80, 75, 70, 65, 60, 55, 50, 45, 40, 35, 30]
        );
    }

    #[test]
    fn converge_stops_above_zero_and_keeps_best_attempt() {
        let codec = FakeCodec::new(1_000_000);
        let img = DynamicImage::new_rgb8(4, 3);
        let out = converge(&codec, &img, 1_000, 80, 5).unwrap();

        let tried = codec.qualities();
        assert!(tried.len() <= 17);
        assert!(tried.iter().all(|&q| q > 0));
        assert_eq!(tried.last(), Some(&5));
        assert_eq!(out.quality, 5);
        assert_eq!(out.attempts as usize, tried.len());
        assert!(!out.within_budget);
        assert_eq!(out.bytes.len(), 5_000_000);
    }

    #[test]
    fn converge_with_uneven_step_never_reaches_zero() {
        let codec = FakeCodec::new(1_000_000);
        let img = DynamicImage::new_rgb8(4, 3);
        converge(&codec, &img, 1, 80, 7).unwrap();

        let tried = codec.qualities();
        assert_eq!(tried.last(), Some(&3));
        assert!(tried.windows(2).all(|w| w[1] < w[0]));
    }

    #[tokio::test]
    async fn process_publishes_converged_bytes_and_releases_staging() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new().with_sized("b.jpg", 200_000));
        let codec = Arc::new(FakeCodec::new(3_000));
        let processor = Processor::new(store.clone(), codec.clone(), settings(&staging));

        let img = processor.process("b.jpg").await.unwrap();

        assert_eq!(img.original_bytes, 200_000);
        assert_eq!(img.final_bytes, 90_000);
        assert_eq!(img.quality, 30);
        assert!(img.within_budget);
        assert_eq!(codec.resizes(), 1);
        assert_eq!(store.puts(), vec![("b.jpg".to_string(), 90_000)]);
        assert_eq!(staged_files(&staging), 0);
    }

    #[tokio::test]
    async fn publish_failure_still_releases_staging_file() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(
            MemoryStore::new()
                .with_sized("b.jpg", 200_000)
                .failing_put("b.jpg"),
        );
        let processor = Processor::new(
            store.clone(),
            Arc::new(FakeCodec::new(3_000)),
            settings(&staging),
        );

        let err = processor.process("b.jpg").await.unwrap_err();

        assert!(matches!(err, ProcessError::Publish(_)));
        assert_eq!(staged_files(&staging), 0);
        assert_eq!(store.object("b.jpg").unwrap().len(), 200_000);
    }

    #[tokio::test]
    async fn download_failure_never_writes_to_store() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(
            MemoryStore::new()
                .with_sized("b.jpg", 200_000)
                .failing_get("b.jpg"),
        );
        let processor = Processor::new(
            store.clone(),
            Arc::new(FakeCodec::new(3_000)),
            settings(&staging),
        );

        let err = processor.process("b.jpg").await.unwrap_err();

        assert!(matches!(err, ProcessError::Download(_)));
        assert!(store.puts().is_empty());
        assert_eq!(staged_files(&staging), 0);
    }

    #[tokio::test]
    async fn decode_failure_releases_staging_and_skips_publish() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new().with_sized("b.jpg", 200_000));
        let processor = Processor::new(
            store.clone(),
            Arc::new(FakeCodec::new(3_000).failing_decode()),
            settings(&staging),
        );

        let err = processor.process("b.jpg").await.unwrap_err();

        assert!(matches!(err, ProcessError::Codec(CodecError::Decode(_))));
        assert_eq!(
            store.calls(),
            vec![Call::Get("b.jpg".to_string())],
            "no put after a decode failure"
        );
        assert_eq!(staged_files(&staging), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn staging_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new().with_sized("b.jpg", 200_000));
        let processor = Processor::new(store, Arc::new(FakeCodec::new(10)), settings(&staging));
        processor.process("b.jpg").await.unwrap();

        let mode = std::fs::metadata(staging.path().join("staging"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn real_jpeg_is_resized_and_recompressed_in_local_store() {
        let staging = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();

        let mut seed: u32 = 0x1234_5678;
        let photo = DynamicImage::ImageRgb8(RgbImage::from_fn(800, 600, |x, y| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let noise = (seed >> 26) as u8;
            Rgb([(x % 256) as u8 ^ noise, (y % 256) as u8, noise.wrapping_mul(4)])
        }));
        let original = JpegCodec.encode(&photo, 100).unwrap();
        std::fs::write(bucket.path().join("photo.jpg"), &original).unwrap();

        let budget = 20_000;
        let store = Arc::new(LocalObjectStore::new(bucket.path()));
        let processor = Processor::new(
            store.clone(),
            Arc::new(JpegCodec),
            ProcessorSettings {
                max_image_size: budget,
                max_width: 320,
                max_height: 240,
                ..settings(&staging)
            },
        );

        let img = processor.process("photo.jpg").await.unwrap();

        assert_eq!(img.original_bytes, original.len() as u64);
        assert!(img.final_bytes <= budget || img.quality == QUALITY_STEP);
        assert_eq!(img.within_budget, img.final_bytes <= budget);

        let published = std::fs::read(bucket.path().join("photo.jpg")).unwrap();
        assert_eq!(published.len() as u64, img.final_bytes);
        assert_eq!(
            JpegCodec.decode(&published).unwrap().dimensions(),
            (320, 240)
        );
        assert_eq!(staged_files(&staging), 0);
        assert_eq!(store.list_objects("").await.unwrap().len(), 1);
    }
}
