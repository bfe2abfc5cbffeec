//! FFmpeg frame source for the drone's H.264-over-UDP stream
//!
//! Decoding runs on an `ffmpeg-decoder` thread that owns the FFmpeg context.
//! A frame filter converts each YUV420P frame to RGB24 and hands it over a
//! small bounded channel; when the channel is full the frame is dropped, so
//! `grab()` always sees recent video rather than a backlog.
//!
//! ```text
//! udp://@0.0.0.0:11111 ─▶ FFmpeg demux/decode ─▶ CaptureFilter ─▶ channel ─▶ grab()
//!                         (ffmpeg-decoder thread)
//! ```
//!
//! The UDP input carries a read timeout, so probing a silent port or waiting
//! on a stream that went quiet ends with an error instead of blocking forever.
//! `release()` clears the running flag (the filter fails the next frame) and
//! joins the decoder thread, which frees the port for a re-open.

use super::source::{DecodedImage, FrameSource, Grab};
use crate::core::types::PixelFormat;
use crate::core::worker::{join_within, spawn_named};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Decoded frames buffered between decoder and capture loop
const FRAME_QUEUE_CAPACITY: usize = 2;

/// UDP read timeout handed to FFmpeg
const INPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time `release()` allows the decoder beyond the input timeout
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Decoder failure recorded for `grab()`
type DecoderError = Arc<Mutex<Option<String>>>;

/// FFmpeg-backed capture handle
pub struct FfmpegSource {
    grab_timeout: Duration,
    input_timeout: Duration,
    frames: Option<Receiver<DecodedImage>>,
    running: Arc<AtomicBool>,
    decoder: Option<JoinHandle<()>>,
    decoder_error: DecoderError,
}

impl FfmpegSource {
    pub fn new(grab_timeout: Duration) -> Self {
        Self {
            grab_timeout,
            input_timeout: INPUT_TIMEOUT,
            frames: None,
            running: Arc::new(AtomicBool::new(false)),
            decoder: None,
            decoder_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the UDP read timeout (default 5 s)
    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout = timeout;
        self
    }

    /// Wait for the decoder thread, so its UDP port is free again
    fn join_decoder(&mut self) {
        if let Some(handle) = self.decoder.take() {
            if let Err(e) = join_within(handle, self.input_timeout + JOIN_GRACE) {
                log::warn!("FFmpeg decoder: {}", e);
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn open(&mut self, url: &str) -> Result<()> {
        self.release();
        *self.decoder_error.lock() = None;

        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let filter = CaptureFilter {
            frames: frame_tx,
            running: Arc::clone(&running),
        };
        let decoder_running = Arc::clone(&running);
        let decoder_error = Arc::clone(&self.decoder_error);
        let decoder_url = url.to_string();
        let input_timeout = self.input_timeout;

        let handle = spawn_named("ffmpeg-decoder", move || {
            let outcome = run_decoder(&decoder_url, input_timeout, filter, ready_tx);
            match outcome {
                Err(e) if decoder_running.load(Ordering::Acquire) => {
                    log::error!("FFmpeg decoding {} failed: {}", decoder_url, e);
                    *decoder_error.lock() = Some(e);
                }
                Err(e) => log::debug!("FFmpeg decoder stopped: {}", e),
                Ok(()) => log::debug!("FFmpeg decoder finished"),
            }
            decoder_running.store(false, Ordering::Release);
        })?;
        self.decoder = Some(handle);
        self.running = running;

        match ready_rx.recv_timeout(self.input_timeout + JOIN_GRACE) {
            Ok(Ok(())) => {
                self.frames = Some(frame_rx);
                log::info!("FFmpeg decoding {}", url);
                Ok(())
            }
            Ok(Err(e)) => {
                self.release();
                Err(Error::StreamOpen(format!("{}: {}", url, e)))
            }
            Err(_) => {
                self.release();
                Err(Error::StreamOpen(format!(
                    "{}: no stream within {:?}",
                    url, self.input_timeout
                )))
            }
        }
    }

    /// Stays true after the decoder exits, so the next `grab()` can report why
    fn is_opened(&self) -> bool {
        self.frames.is_some()
    }

    fn grab(&mut self) -> Result<Grab> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| Error::Decode("FFmpeg source not open".to_string()))?;

        match frames.recv_timeout(self.grab_timeout) {
            Ok(image) => Ok(Grab::Frame(image)),
            Err(RecvTimeoutError::Timeout) if self.running.load(Ordering::Acquire) => {
                Ok(Grab::Pending)
            }
            Err(_) => {
                // Decoder is done; its error is recorded once the thread exits
                self.join_decoder();
                match self.decoder_error.lock().take() {
                    Some(cause) => Err(Error::Decode(cause)),
                    None => Ok(Grab::Failed),
                }
            }
        }
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        let was_open = self.frames.take().is_some();
        self.join_decoder();
        if was_open {
            log::debug!("FFmpeg source released");
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build and run the FFmpeg pipeline. Blocks until decoding ends and
/// returns FFmpeg's error, if any.
fn run_decoder(
    url: &str,
    input_timeout: Duration,
    filter: CaptureFilter,
    ready: Sender<std::result::Result<(), String>>,
) -> std::result::Result<(), String> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("capture", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    // udp protocol options: timeout is in microseconds; reuse lets a re-open
    // bind the port while the previous socket is still closing
    let timeout_us = input_timeout.as_micros().to_string();
    let input = Input::new(url).set_input_opts(
        [
            ("timeout", timeout_us.as_str()),
            ("reuse", "1"),
            ("overrun_nonfatal", "1"),
        ]
        .into(),
    );

    let started = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| format!("build failed: {}", e))
        .and_then(|ctx| ctx.start().map_err(|e| format!("start failed: {}", e)));

    let sch = match started {
        Ok(sch) => sch,
        Err(e) => {
            let _ = ready.send(Err(e.clone()));
            return Err(e);
        }
    };

    let _ = ready.send(Ok(()));
    sch.wait().map_err(|e| e.to_string())
}

/// Frame filter: YUV420P → RGB24, pushed to the capture channel
#[derive(Clone)]
struct CaptureFilter {
    frames: Sender<DecodedImage>,
    running: Arc<AtomicBool>,
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        log::debug!("FFmpeg capture filter ready");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<AvFrame>, String> {
        if !self.running.load(Ordering::Acquire) {
            return Err("capture released".to_string());
        }

        // SAFETY: the pointer is checked for null and the frame outlives this
        // call; plane strides come from FFmpeg for the same frame.
        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return Ok(Some(frame));
            }
            let raw = &*frame.as_ptr();
            if raw.width <= 0 || raw.height <= 0 {
                return Ok(Some(frame));
            }
            if raw.data[0].is_null() || raw.data[1].is_null() || raw.data[2].is_null() {
                return Ok(Some(frame));
            }

            let width = raw.width as usize;
            let height = raw.height as usize;
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;

            let mut rgb = vec![0u8; width * height * 3];
            for row in 0..height {
                for col in 0..width {
                    let y = *raw.data[0].add(row * y_stride + col) as f32;
                    let u = *raw.data[1].add((row / 2) * uv_stride + col / 2) as f32 - 128.0;
                    let v = *raw.data[2].add((row / 2) * uv_stride + col / 2) as f32 - 128.0;

                    let idx = (row * width + col) * 3;
                    rgb[idx] = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
                    rgb[idx + 1] = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
                    rgb[idx + 2] = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
                }
            }

            DecodedImage {
                width: width as u32,
                height: height as u32,
                format: PixelFormat::Rgb24,
                data: rgb,
            }
        };

        match self.frames.try_send(image) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(Some(frame)),
            Err(TrySendError::Disconnected(_)) => Err("capture closed".to_string()),
        }
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        log::debug!("FFmpeg capture filter finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Instant;

    fn silent_port() -> u16 {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn test_silent_stream_times_out_and_reopens() {
        let url = format!("udp://@127.0.0.1:{}", silent_port());
        let mut source = FfmpegSource::new(Duration::from_millis(50))
            .with_input_timeout(Duration::from_millis(300));

        for _ in 0..2 {
            let started = Instant::now();
            let result = source.open(&url);
            assert!(matches!(result, Err(Error::StreamOpen(_))));
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(source.decoder.is_none());
            assert!(!source.is_opened());
        }

        // Port is free again once the decoder is joined
        assert!(UdpSocket::bind(url.trim_start_matches("udp://@")).is_ok());
    }

    #[test]
    fn test_grab_before_open_is_error() {
        let mut source = FfmpegSource::new(Duration::from_millis(50));
        assert!(matches!(source.grab(), Err(Error::Decode(_))));
    }
}
