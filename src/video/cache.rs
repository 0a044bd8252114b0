//! Latest-frame cache
//!
//! Single-slot holder for the most recent decoded JPEG. One writer (the
//! decode stage) and many readers (HTTP handlers polling for frames).
//! The lock is scoped to the slot swap/clone only and is never held
//! across decode or network work, so readers never block for longer
//! than a lock acquisition.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Concurrency-safe holder for the latest decoded frame
#[derive(Default)]
pub struct FrameCache {
    latest: Mutex<Option<Vec<u8>>>,
    has_frame: AtomicBool,
    frames_decoded: AtomicU64,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a freshly decoded JPEG, replacing any previous frame
    pub fn store(&self, jpeg: Vec<u8>) {
        *self.latest.lock() = Some(jpeg);
        self.has_frame.store(true, Ordering::Release);
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Non-blocking read of the latest frame; `None` until the first
    /// frame has been decoded
    pub fn latest(&self) -> Option<Vec<u8>> {
        self.latest.lock().clone()
    }

    /// True once any frame has ever been decoded, independent of whether
    /// the pipeline is currently running
    pub fn has_ever_decoded(&self) -> bool {
        self.has_frame.load(Ordering::Acquire)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    /// Drop the cached frame and reset counters (pipeline start)
    pub fn clear(&self) {
        *self.latest.lock() = None;
        self.has_frame.store(false, Ordering::Release);
        self.frames_decoded.store(0, Ordering::Relaxed);
    }
}
