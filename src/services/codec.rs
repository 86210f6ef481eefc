//! Image codec port and its JPEG implementation.

use image::{DynamicImage, ImageError, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(#[source] ImageError),
    #[error("encode at quality {quality} failed: {source}")]
    Encode {
        quality: u8,
        #[source]
        source: ImageError,
    },
}

/// Decode / resize / encode primitives used by the convergence loop.
///
/// Implementations must be deterministic: the same image and quality always
/// produce the same bytes.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError>;

    /// Shrink `image` to fit inside `max_width` x `max_height`, preserving the
    /// aspect ratio. Images already inside the box are returned unchanged.
    fn resize_to_fit(
        &self,
        image: &DynamicImage,
        max_width: u32,
        max_height: u32,
    ) -> DynamicImage;

    /// Encode at `quality` (1..=100).
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError>;
}

/// Baseline JPEG codec backed by the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        image::load_from_memory(bytes).map_err(CodecError::Decode)
    }

    fn resize_to_fit(
        &self,
        image: &DynamicImage,
        max_width: u32,
        max_height: u32,
    ) -> DynamicImage {
        if image.width() <= max_width && image.height() <= max_height {
            return image.clone();
        }
        image.resize(max_width, max_height, FilterType::Lanczos3)
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let quality = quality.clamp(1, 100);
        let mut buf = Vec::new();
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(&rgb)
            .map_err(|source| CodecError::Encode { quality, source })?;
        Ok(buf)
    }
}

#[cfg(test)]
pub mod testing {
    //! Codec whose output size is a pure function of quality.

    use super::*;
    use std::sync::Mutex;

    pub struct FakeCodec {
        bytes_per_quality: usize,
        fail_decode: bool,
        resizes: Mutex<u32>,
        qualities: Mutex<Vec<u8>>,
    }

    impl FakeCodec {
        /// Encodes to `quality * bytes_per_quality` bytes.
        pub fn new(bytes_per_quality: usize) -> Self {
            Self {
                bytes_per_quality,
                fail_decode: false,
                resizes: Mutex::new(0),
                qualities: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_decode(mut self) -> Self {
            self.fail_decode = true;
            self
        }

        pub fn resizes(&self) -> u32 {
            *self.resizes.lock().unwrap()
        }

        pub fn qualities(&self) -> Vec<u8> {
            self.qualities.lock().unwrap().clone()
        }
    }

    impl ImageCodec for FakeCodec {
        fn decode(&self, _bytes: &[u8]) -> Result<DynamicImage, CodecError> {
            if self.fail_decode {
                return Err(CodecError::Decode(ImageError::IoError(
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "not an image"),
                )));
            }
            Ok(DynamicImage::new_rgb8(4000, 3000))
        }

        fn resize_to_fit(
            &self,
            _image: &DynamicImage,
            max_width: u32,
            max_height: u32,
        ) -> DynamicImage {
            *self.resizes.lock().unwrap() += 1;
            DynamicImage::new_rgb8(max_width.min(4), max_height.min(3))
        }

        fn encode(&self, _image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
            self.qualities.lock().unwrap().push(quality);
            Ok(vec![quality; quality as usize * self.bytes_per_quality])
        }
    }
}
