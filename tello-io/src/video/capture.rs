//! Capture thread for the video stream
//!
//! Pulls decoded images from the frame source and publishes each one as the
//! stream's latest frame.

use super::slot::FrameSlot;
use super::source::{FrameSource, Grab};
use crate::core::types::Frame;
use crate::error::Error;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// State shared between the capture thread and [`super::VideoStream`]
pub(super) struct CaptureState {
    pub slot: Arc<FrameSlot>,
    pub active: Arc<AtomicBool>,
    pub last_read_ok: Arc<AtomicBool>,
    pub frames_captured: Arc<AtomicU64>,
}

/// Why the capture loop returned
#[derive(Debug)]
pub(super) enum CaptureExit {
    /// `stop()` was called
    Stopped,
    /// The last read failed or the capture closed on its own
    StreamEnded,
    /// The decoder raised an error
    Failed(Error),
}

/// Capture loop - runs while `active`.
///
/// # Stop Conditions
///
/// - `active` cleared by `stop()`: [`CaptureExit::Stopped`]
/// - previous read failed, or the source no longer reports open:
///   `active` is cleared here and the loop returns [`CaptureExit::StreamEnded`]
/// - `grab()` errors: [`CaptureExit::Failed`]
///
/// The source is released before returning, whatever the reason.
pub(super) fn capture_loop(mut source: Box<dyn FrameSource>, state: CaptureState) -> CaptureExit {
    let mut sequence = 0u64;

    let exit = loop {
        if !state.active.load(Ordering::Acquire) {
            break CaptureExit::Stopped;
        }

        if !state.last_read_ok.load(Ordering::Acquire) || !source.is_opened() {
            state.active.store(false, Ordering::Release);
            break CaptureExit::StreamEnded;
        }

        match source.grab() {
            Ok(Grab::Frame(image)) => {
                sequence += 1;
                let frame = Frame {
                    sequence,
                    width: image.width,
                    height: image.height,
                    format: image.format,
                    captured_at: Utc::now(),
                    data: image.data,
                };

                if !state.slot.publish(Arc::new(frame)) {
                    // Sealed by stop() while we were decoding
                    break CaptureExit::Stopped;
                }
                state.frames_captured.fetch_add(1, Ordering::Relaxed);
                log::trace!("Captured frame {}", sequence);
            }
            Ok(Grab::Pending) => {}
            Ok(Grab::Failed) => {
                log::debug!("Frame read failed after {} frames", sequence);
                state.last_read_ok.store(false, Ordering::Release);
            }
            Err(e) => {
                state.active.store(false, Ordering::Release);
                break CaptureExit::Failed(e);
            }
        }
    };

    source.release();
    exit
}
