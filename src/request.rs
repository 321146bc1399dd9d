//! Decode request records tracked by the loader

use crate::decode::DecodedImage;
use anyhow::{bail, Result};
use std::sync::Arc;

/// A single decode request.
///
/// Lives in exactly one place at a time: the pending queue, the worker's
/// in-flight slot, or the completed-results queue. The result is shared via
/// `Arc`, so reading it never transfers or copies the pixel data.
#[derive(Debug, Clone)]
pub struct RequestItem {
    uri: String,
    order: i32,
    width: u32,
    height: u32,
    result: Option<Arc<DecodedImage>>,
}

impl RequestItem {
    /// Build a request for `uri` at the given priority order.
    ///
    /// `width` and `height` bound the decode size; both must be zero
    /// (native size) or both strictly positive. A half-zero pair is
    /// rejected rather than guessed at.
    pub fn new(uri: impl Into<String>, order: i32, width: u32, height: u32) -> Result<Self> {
        if (width == 0) != (height == 0) {
            bail!(
                "Invalid decode bound {}x{}: width and height must both be zero or both be positive",
                width,
                height
            );
        }
        Ok(Self {
            uri: uri.into(),
            order,
            width,
            height,
            result: None,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Priority order; requests with a lower value are filed first.
    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the request asks for a scaled decode rather than native size.
    pub fn is_bounded(&self) -> bool {
        self.width > 0
    }

    /// The decoded image, once the worker has produced one.
    pub fn result(&self) -> Option<Arc<DecodedImage>> {
        self.result.clone()
    }

    pub(crate) fn set_result(&mut self, result: Arc<DecodedImage>) {
        self.result = Some(result);
    }
}
