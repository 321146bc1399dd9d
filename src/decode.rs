//! Image decoding seam between the loader and the codec library
//!
//! The loader never decodes anything itself; it calls through the
//! [`DecodeProvider`] trait so that applications can swap in their own
//! sources (embedded previews, remote fetches, test stubs). [`FileDecoder`]
//! is the stock implementation over the `image` crate.

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// A decoded image ready for display.
///
/// Wraps the pixel buffer produced by the decode provider. Consumers hold
/// these behind `Arc`, so a completed request can be read repeatedly without
/// copying pixels.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Borrow the underlying pixel data.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Consume the wrapper, yielding the pixel data.
    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// Produces decoded images for the background loader.
///
/// Implementations must be callable from the worker thread. Failures are
/// reported per request; the loader logs them and moves on.
pub trait DecodeProvider: Send + Sync {
    /// Decode `uri` at its native size.
    fn load(&self, uri: &str) -> Result<DecodedImage>;

    /// Decode `uri` scaled to fit within `width` x `height`, preserving
    /// aspect ratio. Both bounds are strictly positive.
    fn load_bounded(&self, uri: &str, width: u32, height: u32) -> Result<DecodedImage>;
}

/// Decode provider backed by the local filesystem.
///
/// Accepts plain paths and `file://` URIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl FileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode(&self, uri: &str) -> Result<DecodedImage> {
        let path = path_from_uri(uri)?;
        let image = image::ImageReader::open(&path)
            .with_context(|| format!("Failed to open image file: {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("Failed to probe image format: {}", path.display()))?
            .decode()
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;
        Ok(DecodedImage::new(image))
    }
}

impl DecodeProvider for FileDecoder {
    fn load(&self, uri: &str) -> Result<DecodedImage> {
        self.decode(uri)
    }

    fn load_bounded(&self, uri: &str, width: u32, height: u32) -> Result<DecodedImage> {
        let full = self.decode(uri)?;
        if full.width() <= width && full.height() <= height {
            return Ok(full);
        }
        Ok(DecodedImage::new(full.into_image().thumbnail(width, height)))
    }
}

/// Resolve a request URI to a local path.
pub(crate) fn path_from_uri(uri: &str) -> Result<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if uri.contains("://") {
        bail!("Unsupported URI scheme: {}", uri);
    }
    Ok(Path::new(uri).to_path_buf())
}
