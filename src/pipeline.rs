//! Cache-backed loading pipeline
//!
//! Glues a [`BoundedCache`] in front of an [`ImageLoader`]: every decoded
//! result is stored in the cache before the consumer's callback runs, and
//! requests for already-cached URIs are skipped. This is the arrangement a
//! grid or filmstrip view wants, without each widget wiring it by hand.

use crate::cache::BoundedCache;
use crate::decode::{path_from_uri, DecodeProvider, DecodedImage};
use crate::loader::ImageLoader;
use crate::notify::Wakeup;
use crate::request::RequestItem;
use crate::{source_cache_key, PipelineConfig};
use anyhow::Result;
use std::sync::Arc;

/// Cache key for a request URI.
///
/// File-backed URIs key on the file's identity (path, size, mtime), so an
/// edited photo misses the cache and gets re-decoded while its stale entry
/// ages out. Anything else keys on the URI itself.
fn cache_key(uri: &str) -> String {
    path_from_uri(uri)
        .ok()
        .and_then(|path| source_cache_key(&path).ok())
        .unwrap_or_else(|| uri.to_owned())
}

/// A bounded cache of decoded images fed by a background loader.
pub struct ImagePipeline {
    cache: Arc<BoundedCache<String, Arc<DecodedImage>>>,
    loader: ImageLoader,
}

impl ImagePipeline {
    pub fn new(
        config: &PipelineConfig,
        provider: Arc<dyn DecodeProvider>,
        wakeup: Arc<dyn Wakeup>,
    ) -> Self {
        let cache = Arc::new(BoundedCache::new(config.cache_capacity));
        let loader = ImageLoader::new(provider, wakeup);

        let cache_for_handler = Arc::clone(&cache);
        loader.set_on_loaded(move |item| {
            if let Some(result) = item.result() {
                cache_for_handler.add(cache_key(item.uri()), result);
            }
        });

        Self { cache, loader }
    }

    /// Register a consumer callback. Results are cached before it runs.
    pub fn set_on_loaded<F>(&self, mut handler: F)
    where
        F: FnMut(RequestItem) + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        self.loader.set_on_loaded(move |item| {
            if let Some(result) = item.result() {
                cache.add(cache_key(item.uri()), result);
            }
            handler(item);
        });
    }

    /// Fetch a previously decoded image, promoting it in the cache.
    pub fn cached(&self, uri: &str) -> Option<Arc<DecodedImage>> {
        self.cache.get(cache_key(uri).as_str())
    }

    /// Request a background decode of `uri` at native size.
    ///
    /// An already-cached URI is not re-requested (and produces no
    /// callback), but it is promoted to most recently used; read it via
    /// [`cached`](Self::cached).
    pub fn request(&self, uri: &str, order: i32) -> Result<()> {
        if self.cache.get(cache_key(uri).as_str()).is_some() {
            return Ok(());
        }
        self.loader.request(uri, order)
    }

    /// Request a background decode bounded to `width` x `height`.
    pub fn request_sized(&self, uri: &str, order: i32, width: u32, height: u32) -> Result<()> {
        if self.cache.get(cache_key(uri).as_str()).is_some() {
            return Ok(());
        }
        self.loader.request_sized(uri, order, width, height)
    }

    /// Drop a cached image, releasing its pixel data if this was the last
    /// reference.
    pub fn evict(&self, uri: &str) -> bool {
        self.cache.try_remove(cache_key(uri).as_str())
    }

    /// Deliver completed decodes; see [`ImageLoader::drain_completed`].
    pub fn drain_completed(&self) -> usize {
        self.loader.drain_completed()
    }

    /// Access the underlying loader, e.g. for `cancel` or block control.
    pub fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cached_items: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            pending_requests: self.loader.pending_count(),
        }
    }

    /// Shut the loader down and drop every cached image.
    pub fn cleanup(&self) {
        self.loader.cleanup();
        self.cache.clear();
    }
}

/// Snapshot of pipeline occupancy for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub cached_items: usize,
    pub cache_capacity: usize,
    pub pending_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelWakeup;
    use anyhow::bail;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        loads: AtomicUsize,
    }

    impl DecodeProvider for CountingProvider {
        fn load(&self, uri: &str) -> Result<DecodedImage> {
            if uri.contains("bad") {
                bail!("stub decode failure");
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(DecodedImage::new(DynamicImage::new_rgb8(1, 1)))
        }

        fn load_bounded(&self, uri: &str, _width: u32, _height: u32) -> Result<DecodedImage> {
            self.load(uri)
        }
    }

    fn pipeline() -> (ImagePipeline, Arc<CountingProvider>, std::sync::mpsc::Receiver<()>) {
        let provider = Arc::new(CountingProvider {
            loads: AtomicUsize::new(0),
        });
        let (wakeup, wakeup_rx) = ChannelWakeup::new();
        let config = PipelineConfig::default();
        let pipeline = ImagePipeline::new(
            &config,
            Arc::clone(&provider) as Arc<dyn DecodeProvider>,
            Arc::new(wakeup),
        );
        (pipeline, provider, wakeup_rx)
    }

    #[test]
    fn completed_decodes_land_in_the_cache() {
        let (pipeline, _provider, wakeup_rx) = pipeline();

        assert!(pipeline.cached("photo:a").is_none());
        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pipeline.drain_completed(), 1);

        assert!(pipeline.cached("photo:a").is_some());
        assert_eq!(pipeline.stats().cached_items, 1);

        pipeline.cleanup();
    }

    #[test]
    fn cached_uri_is_not_redecoded() {
        let (pipeline, provider, wakeup_rx) = pipeline();

        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);

        pipeline.request("photo:a", 0).unwrap();
        assert_eq!(pipeline.loader().pending_count(), 0);
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);

        pipeline.cleanup();
    }

    #[test]
    fn consumer_handler_sees_the_result_after_caching() {
        let (pipeline, _provider, wakeup_rx) = pipeline();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_inner = Arc::clone(&seen);
        pipeline.set_on_loaded(move |item| {
            assert!(item.result().is_some());
            seen_inner.fetch_add(1, Ordering::SeqCst);
        });

        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(pipeline.cached("photo:a").is_some());

        pipeline.cleanup();
    }

    #[test]
    fn failed_decode_caches_nothing() {
        let (pipeline, _provider, wakeup_rx) = pipeline();

        pipeline.request("photo:bad", 0).unwrap();
        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();

        assert!(pipeline.cached("photo:bad").is_none());

        pipeline.cleanup();
    }

    #[test]
    fn edited_file_misses_the_cache() {
        let (pipeline, provider, wakeup_rx) = pipeline();
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, b"original pixels").unwrap();
        let uri = photo.to_str().unwrap().to_owned();

        pipeline.request(&uri, 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();
        assert!(pipeline.cached(&uri).is_some());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);

        // Replacing the file rotates its cache key, so the stale decode is
        // no longer served and a new request decodes again.
        std::fs::write(&photo, b"reprocessed pixels, now larger").unwrap();
        assert!(pipeline.cached(&uri).is_none());

        pipeline.request(&uri, 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();
        assert!(pipeline.cached(&uri).is_some());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);

        pipeline.cleanup();
    }

    #[test]
    fn rerequesting_a_cached_uri_promotes_it() {
        let provider = Arc::new(CountingProvider {
            loads: AtomicUsize::new(0),
        });
        let (wakeup, wakeup_rx) = ChannelWakeup::new();
        let config = PipelineConfig { cache_capacity: 3 };
        let pipeline = ImagePipeline::new(
            &config,
            Arc::clone(&provider) as Arc<dyn DecodeProvider>,
            Arc::new(wakeup),
        );

        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();
        pipeline.request("photo:b", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();

        // "photo:a" is the coldest entry; the short-circuited re-request
        // must promote it, leaving "photo:b" to be evicted next.
        pipeline.request("photo:a", 0).unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);

        pipeline.request("photo:c", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();

        assert!(pipeline.cached("photo:b").is_none());
        assert!(pipeline.cached("photo:a").is_some());
        assert!(pipeline.cached("photo:c").is_some());

        pipeline.cleanup();
    }

    #[test]
    fn evict_releases_a_cached_image() {
        let (pipeline, _provider, wakeup_rx) = pipeline();

        pipeline.request("photo:a", 0).unwrap();
        wakeup_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pipeline.drain_completed();

        assert!(pipeline.evict("photo:a"));
        assert!(pipeline.cached("photo:a").is_none());
        assert!(!pipeline.evict("photo:a"));

        pipeline.cleanup();
    }
}
