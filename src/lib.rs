//! Bounded image caching and background decoding for photo applications
//!
//! This crate provides the resource-management core a photo browser needs to
//! stay responsive: decoded images are expensive to produce and to hold, so
//! decoding happens off the UI thread and the results live in a strictly
//! bounded cache with deterministic release.
//!
//! # Features
//!
//! - **Bounded LRU cache**: count-capped, thread-safe, drops evicted pixel
//!   buffers on the spot
//! - **Background loader**: one worker thread per loader, newest-first
//!   processing so the latest scroll position wins, per-URI request
//!   deduplication, pause/resume via a re-entrant block count
//! - **Cross-thread delivery**: coalesced wakeups plus an owner-side drain,
//!   so completion callbacks always run on the owning thread
//! - **Pluggable decoding**: bring your own [`DecodeProvider`]; a
//!   file-backed implementation over the `image` crate is included
//! - **Cache-backed pipeline**: [`ImagePipeline`] wires the cache and the
//!   loader together for grid and filmstrip views

pub mod cache;
pub mod decode;
pub mod loader;
pub mod notify;
pub mod pipeline;
pub mod request;

pub use cache::BoundedCache;
pub use decode::{DecodeProvider, DecodedImage, FileDecoder};
pub use loader::ImageLoader;
pub use notify::{ChannelWakeup, Wakeup};
pub use pipeline::{ImagePipeline, PipelineStats};
pub use request::RequestItem;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for an [`ImagePipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity bound of the decoded-image cache.
    pub cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Enough for a filmstrip of thumbnails either side of the
            // current photo.
            cache_capacity: 30,
        }
    }
}

/// Derive a cache key for a local image file.
///
/// The key fingerprints the file's identity — canonical path, size, and
/// modification time — so editing or replacing a photo yields a fresh key
/// and the old entry ages out of the cache instead of being served stale.
/// [`ImagePipeline`] keys file-backed URIs this way.
pub fn source_cache_key(file_path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let metadata = std::fs::metadata(file_path)?;
    let canonical = file_path.canonicalize()?;
    let modified = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata.len().to_le_bytes());
    hasher.update(modified.as_nanos().to_le_bytes());

    // Half the digest keeps keys short without risking collisions.
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..16]))
}
