//! Background image loading with request deduplication
//!
//! One [`ImageLoader`] owns one lazily-started worker thread. Callers file
//! requests from the owning thread; the worker decodes them via the
//! configured [`DecodeProvider`] and parks finished items on a results
//! queue, signalling the owner through a coalescing [`Wakeup`]. The owner
//! then calls [`ImageLoader::drain_completed`] from its own event loop to
//! receive the batch.
//!
//! The pending queue is deliberately a stack: the most recently filed (or
//! most recently re-filed) request is decoded next, which keeps the images
//! under the user's latest interaction ahead of older backlog.

use crate::decode::DecodeProvider;
use crate::notify::Wakeup;
use crate::request::RequestItem;
use anyhow::{bail, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Callback invoked once per completed request during a drain.
pub type LoadedHandler = Box<dyn FnMut(RequestItem) + Send>;

/// Pending work, guarded by the queue lock.
struct PendingQueue {
    /// Stack of waiting requests; the worker pops from the end.
    items: Vec<RequestItem>,
    /// URIs present in `items`, for O(1) dedup checks.
    queued_uris: HashSet<String>,
    /// While above zero the worker must not dequeue new work.
    block_count: usize,
}

/// Finished work, guarded by the results lock.
struct ResultQueue {
    /// Completed requests awaiting a drain, in completion order.
    done: Vec<RequestItem>,
    /// URI the worker is decoding right now, if any. The worker writes it;
    /// the owning thread only reads it for dedup.
    current_uri: Option<String>,
    /// Whether the wakeup has fired since the last drain.
    notified: bool,
}

/// State shared between the owning thread and the worker.
///
/// Lock order is queue before results when both are needed; neither lock is
/// ever held across decoding or across a callback.
struct LoaderShared {
    queue: Mutex<PendingQueue>,
    work_ready: Condvar,
    results: Mutex<ResultQueue>,
    should_cancel: AtomicBool,
    provider: Arc<dyn DecodeProvider>,
    wakeup: Arc<dyn Wakeup>,
}

/// A single-worker background decode queue.
///
/// Shut it down with [`cleanup`](Self::cleanup) (also run on drop). A
/// loader is terminal once shut down; build a fresh one to keep loading.
pub struct ImageLoader {
    shared: Arc<LoaderShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    on_loaded: Mutex<Option<LoadedHandler>>,
}

impl ImageLoader {
    pub fn new(provider: Arc<dyn DecodeProvider>, wakeup: Arc<dyn Wakeup>) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                queue: Mutex::new(PendingQueue {
                    items: Vec::new(),
                    queued_uris: HashSet::new(),
                    block_count: 0,
                }),
                work_ready: Condvar::new(),
                results: Mutex::new(ResultQueue {
                    done: Vec::new(),
                    current_uri: None,
                    notified: false,
                }),
                should_cancel: AtomicBool::new(false),
                provider,
                wakeup,
            }),
            worker: Mutex::new(None),
            on_loaded: Mutex::new(None),
        }
    }

    /// Register the callback [`drain_completed`](Self::drain_completed)
    /// feeds. Replaces any previous handler.
    pub fn set_on_loaded<F>(&self, handler: F)
    where
        F: FnMut(RequestItem) + Send + 'static,
    {
        *self.on_loaded.lock() = Some(Box::new(handler));
    }

    /// File a decode request for `uri` at native size.
    pub fn request(&self, uri: &str, order: i32) -> Result<()> {
        self.request_sized(uri, order, 0, 0)
    }

    /// File a decode request for `uri`, bounded to `width` x `height`
    /// (both zero for native size).
    ///
    /// A URI already being decoded is left alone; a URI already pending is
    /// moved to the front of the processing order instead of being queued
    /// twice. Fails if the dimension pair is half-zero or the loader has
    /// been shut down.
    pub fn request_sized(&self, uri: &str, order: i32, width: u32, height: u32) -> Result<()> {
        let item = RequestItem::new(uri, order, width, height)?;
        self.start_worker()?;

        let mut queue = self.shared.queue.lock();
        if self.insert_request(&mut queue, item) {
            self.shared.work_ready.notify_one();
        }
        Ok(())
    }

    /// Drop the pending request for `uri`, if one is queued.
    ///
    /// A request already being decoded, or already completed, is unaffected.
    pub fn cancel(&self, uri: &str) {
        let mut queue = self.shared.queue.lock();
        if let Some(pos) = queue.items.iter().position(|r| r.uri() == uri) {
            queue.items.remove(pos);
            queue.queued_uris.remove(uri);
        }
    }

    /// Suspend dequeuing of new work. Re-entrant; pair each call with
    /// [`pop_block`](Self::pop_block). A decode already in flight runs to
    /// completion.
    pub fn push_block(&self) {
        self.shared.queue.lock().block_count += 1;
    }

    /// Undo one [`push_block`](Self::push_block); the worker resumes when
    /// the count reaches zero.
    pub fn pop_block(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.block_count > 0 {
            queue.block_count -= 1;
            if queue.block_count == 0 {
                self.shared.work_ready.notify_all();
            }
        }
    }

    /// Deliver every completed request to the registered handler, in
    /// completion order, and return how many were delivered.
    ///
    /// Call this from the owning thread when the wakeup fires. The results
    /// lock is only held to snapshot the batch; callbacks run outside it.
    /// Without a registered handler the batch is discarded.
    ///
    /// The handler may call [`set_on_loaded`](Self::set_on_loaded) to
    /// replace itself (the replacement serves the next drain), but must not
    /// call [`cleanup`](Self::cleanup). A re-entrant `drain_completed` from
    /// inside the handler delivers nothing.
    pub fn drain_completed(&self) -> usize {
        let batch = {
            let mut results = self.shared.results.lock();
            results.notified = false;
            std::mem::take(&mut results.done)
        };

        let count = batch.len();
        // Run callbacks with the handler slot released, so a callback can
        // install a replacement handler.
        let handler = self.on_loaded.lock().take();
        if let Some(mut handler) = handler {
            for item in batch {
                handler(item);
            }
            let mut slot = self.on_loaded.lock();
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
        count
    }

    /// Stop the worker and join it. Idempotent; returns immediately if the
    /// worker was never started. No callbacks fire after this returns.
    ///
    /// Must not be called from inside this loader's own loaded handler.
    pub fn cleanup(&self) {
        self.shared.should_cancel.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            {
                let _queue = self.shared.queue.lock();
                self.shared.work_ready.notify_all();
            }
            if handle.join().is_err() {
                warn!("image loader worker panicked during shutdown");
            }
        }
    }

    /// Number of requests waiting to be decoded.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    /// Number of completed requests awaiting a drain.
    pub fn completed_count(&self) -> usize {
        self.shared.results.lock().done.len()
    }

    fn start_worker(&self) -> Result<()> {
        if self.shared.should_cancel.load(Ordering::SeqCst) {
            bail!("Image loader has been shut down; create a new instance");
        }

        let mut worker = self.worker.lock();
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("pixcache-loader".into())
                .spawn(move || worker_loop(&shared))?;
            *worker = Some(handle);
        }
        Ok(())
    }

    /// Insert `item` into the pending queue; returns whether the queue
    /// actually grew. Caller holds the queue lock.
    fn insert_request(&self, queue: &mut PendingQueue, item: RequestItem) -> bool {
        // Same URI as the decode currently in flight: nothing to do.
        {
            let results = self.shared.results.lock();
            if results.current_uri.as_deref() == Some(item.uri()) {
                return false;
            }
        }

        // Already queued: re-file it at the pop end of the stack.
        if queue.queued_uris.contains(item.uri()) {
            if let Some(pos) = queue.items.iter().position(|r| r.uri() == item.uri()) {
                if queue.items[pos].order() != item.order() {
                    warn!(
                        "Filing another request of order {} (previously {}) for `{}`",
                        item.order(),
                        queue.items[pos].order(),
                        item.uri()
                    );
                }
                let existing = queue.items.remove(pos);
                queue.items.push(existing);
            }
            return false;
        }

        queue.queued_uris.insert(item.uri().to_owned());
        queue.items.push(item);
        true
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn worker_loop(shared: &LoaderShared) {
    debug!("image loader worker starting");
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            while (queue.items.is_empty() || queue.block_count > 0)
                && !shared.should_cancel.load(Ordering::SeqCst)
            {
                shared.work_ready.wait(&mut queue);
            }
            if shared.should_cancel.load(Ordering::SeqCst) {
                debug!("image loader worker exiting");
                return;
            }

            let Some(request) = queue.items.pop() else {
                continue;
            };
            queue.queued_uris.remove(request.uri());
            // Publish the in-flight URI before releasing the queue lock, so
            // a duplicate request can never slip in between.
            shared.results.lock().current_uri = Some(request.uri().to_owned());
            request
        };

        let finished = process_request(shared, request);

        let mut results = shared.results.lock();
        results.current_uri = None;
        if let Some(done) = finished {
            results.done.push(done);
            if !results.notified {
                results.notified = true;
                drop(results);
                shared.wakeup.wakeup();
            }
        }
    }
}

/// Decode one request. A failure drops the request: the worker logs and
/// moves on, and no callback fires for it.
fn process_request(shared: &LoaderShared, mut request: RequestItem) -> Option<RequestItem> {
    let decoded = if request.is_bounded() {
        shared
            .provider
            .load_bounded(request.uri(), request.width(), request.height())
    } else {
        shared.provider.load(request.uri())
    };

    match decoded {
        Ok(image) => {
            request.set_result(Arc::new(image));
            Some(request)
        }
        Err(err) => {
            warn!("Failed to decode `{}`: {:#}", request.uri(), err);
            None
        }
    }
}
