//! Latest-frame cell shared between the capture thread and readers

use crate::core::types::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Single-writer, multi-reader cell holding the most recent frame.
///
/// The writer swaps in a whole `Arc<Frame>`; readers clone the `Arc`. Once
/// sealed, publishes are rejected, so a reader never sees a frame captured
/// after the stream was stopped.
#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<SlotInner>,
}

#[derive(Default)]
struct SlotInner {
    frame: Option<Arc<Frame>>,
    sealed: bool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame. Returns false if the slot is sealed.
    pub fn publish(&self, frame: Arc<Frame>) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        inner.frame = Some(frame);
        true
    }

    /// Most recent frame, if any
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().frame.clone()
    }

    /// Reject all further publishes
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }
}
