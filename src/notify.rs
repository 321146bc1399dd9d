//! Cross-thread wakeup seam
//!
//! The worker thread never calls back into the owning thread directly; it
//! signals a [`Wakeup`] and the owning thread drains completed results from
//! its own event loop. The loader coalesces signals internally, so a
//! `Wakeup` impl only needs to make the owning thread run its drain step
//! at some point after each call.

use std::sync::mpsc::{self, Receiver, Sender};

/// Signals the owning thread that completed results are waiting.
///
/// Must be callable from any thread.
pub trait Wakeup: Send + Sync {
    fn wakeup(&self);
}

impl<F: Fn() + Send + Sync> Wakeup for F {
    fn wakeup(&self) {
        self()
    }
}

/// A [`Wakeup`] that posts a unit message on an mpsc channel.
///
/// Useful for tests and for event loops that already poll a channel: block
/// on (or poll) the paired receiver, and call the loader's drain when a
/// message arrives.
pub struct ChannelWakeup {
    tx: Sender<()>,
}

impl ChannelWakeup {
    /// Create the wakeup and the receiver the owning thread should watch.
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl Wakeup for ChannelWakeup {
    fn wakeup(&self) {
        // A gone receiver just means the owner stopped listening.
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn closures_are_wakeups() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_inner = Arc::clone(&hits);
        let wakeup = move || {
            hits_inner.fetch_add(1, Ordering::SeqCst);
        };

        wakeup.wakeup();
        wakeup.wakeup();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn channel_wakeup_delivers() {
        let (wakeup, rx) = ChannelWakeup::new();
        wakeup.wakeup();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn channel_wakeup_survives_dropped_receiver() {
        let (wakeup, rx) = ChannelWakeup::new();
        drop(rx);
        wakeup.wakeup();
    }
}
