//! Video stream: continuous acquisition of the latest decoded frame
//!
//! # Thread Model
//!
//! ```text
//! vehicle ── UDP :11111 ──▶ FrameSource ──▶ video-capture thread ──▶ FrameSlot
//!                                                                   │
//!                                   current_frame() (any thread) ◀──┘
//! ```
//!
//! The capture thread owns the [`FrameSource`] once started and releases it
//! when the loop ends. `stop()` clears `active`, seals the slot, waits for the
//! thread, and closes any attached [`RenderSurface`]s.
//!
//! # Backends
//!
//! - `synthetic`: test-pattern frames, always available
//! - `ffmpeg`: FFmpeg decode of the real H.264 stream (`--features ffmpeg`)

mod capture;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod slot;
pub mod source;
pub mod synthetic;

pub use slot::FrameSlot;
pub use source::{DecodedImage, FrameSource, Grab, RenderSurface, create_frame_source};

use crate::config::VideoConfig;
use crate::core::fault::{FaultHandler, LoopKind};
use crate::core::types::Frame;
use crate::core::worker::{catch_panic, join_within, spawn_named};
use crate::error::{Error, Result};
use capture::{CaptureExit, CaptureState, capture_loop};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Continuous acquisition of the most recent decoded frame from a UDP media
/// source.
pub struct VideoStream {
    url: String,
    /// Held until the capture thread takes it
    source: Mutex<Option<Box<dyn FrameSource>>>,
    slot: Arc<FrameSlot>,
    active: Arc<AtomicBool>,
    last_read_ok: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    stopped: AtomicBool,
    stop_timeout: Duration,
    surfaces: Mutex<Vec<Box<dyn RenderSurface>>>,
    capture_handle: Mutex<Option<JoinHandle<()>>>,
}

impl VideoStream {
    /// Open `source` on `udp://@bind_host:port`.
    ///
    /// If the source is not open after the first attempt it is re-opened
    /// once; still closed is a [`Error::StreamOpen`].
    pub fn open(config: &VideoConfig, mut source: Box<dyn FrameSource>) -> Result<Self> {
        let url = config.stream_url();
        log::info!("Opening video capture on {}", url);

        if let Err(e) = source.open(&url) {
            log::warn!("Video capture open failed: {}", e);
        }

        if !source.is_opened() {
            log::warn!("Video capture not open, retrying {}", url);
            let retry = source.open(&url);
            if !source.is_opened() {
                source.release();
                let reason = match retry {
                    Err(e) => e.to_string(),
                    Ok(()) => "capture reports not open".to_string(),
                };
                return Err(Error::StreamOpen(format!("{}: {}", url, reason)));
            }
        }

        log::info!("Video capture open on {}", url);

        Ok(Self {
            url,
            source: Mutex::new(Some(source)),
            slot: Arc::new(FrameSlot::new()),
            active: Arc::new(AtomicBool::new(true)),
            last_read_ok: Arc::new(AtomicBool::new(true)),
            frames_captured: Arc::new(AtomicU64::new(0)),
            stopped: AtomicBool::new(false),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            surfaces: Mutex::new(Vec::new()),
            capture_handle: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn last_read_ok(&self) -> bool {
        self.last_read_ok.load(Ordering::Acquire)
    }

    /// Frames published so far
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Latest frame, or `None` before the first one
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    /// Attach a surface to be closed by `stop()`
    pub fn attach_surface(&self, mut surface: Box<dyn RenderSurface>) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            surface.close()?;
            return Err(Error::Other(format!(
                "video stream stopped, surface '{}' closed",
                surface.name()
            )));
        }
        self.surfaces.lock().push(surface);
        Ok(())
    }

    /// Start the `video-capture` thread.
    ///
    /// Every way the loop can end other than `stop()` is reported to `faults`.
    pub fn start_capture_loop(&self, faults: Arc<dyn FaultHandler>) -> Result<()> {
        let source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| Error::Other("capture loop already started or stopped".to_string()))?;

        let state = CaptureState {
            slot: Arc::clone(&self.slot),
            active: Arc::clone(&self.active),
            last_read_ok: Arc::clone(&self.last_read_ok),
            frames_captured: Arc::clone(&self.frames_captured),
        };

        let handle = spawn_named("video-capture", move || {
            log::debug!("Video capture loop started");
            let exit = catch_panic(move || capture_loop(source, state)).unwrap_or_else(|panic| {
                CaptureExit::Failed(Error::Decode(format!(
                    "video capture loop panicked: {}",
                    panic
                )))
            });
            match exit {
                CaptureExit::Stopped => log::info!("Video capture loop stopped"),
                CaptureExit::StreamEnded => {
                    log::warn!("Video stream ended (read failed or capture closed)");
                    faults.report(
                        LoopKind::VideoCapture,
                        Error::Decode("video stream ended".to_string()),
                    );
                }
                CaptureExit::Failed(e) => {
                    log::error!("Error with video processing: {}", e);
                    faults.report(LoopKind::VideoCapture, e);
                }
            }
        })?;

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop capturing, release the capture handle and render surfaces.
    ///
    /// Idempotent. Every step runs even if an earlier one fails; failures are
    /// collected into one [`Error::Shutdown`].
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            log::debug!("Video stream already stopped");
            return Ok(());
        }

        self.active.store(false, Ordering::Release);
        self.slot.seal();

        let mut failures = Vec::new();

        let handle = self.capture_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = join_within(handle, self.stop_timeout) {
                failures.push(e.to_string());
            }
        }

        // Never started: the capture handle is still ours
        if let Some(mut source) = self.source.lock().take() {
            source.release();
        }

        for mut surface in self.surfaces.lock().drain(..) {
            if let Err(e) = surface.close() {
                failures.push(format!("surface '{}': {}", surface.name(), e));
            }
        }

        log::info!(
            "Video stream stopped ({} frames captured)",
            self.frames_captured()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(failures.join("; ")))
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Video stream cleanup: {}", e);
        }
    }
}
