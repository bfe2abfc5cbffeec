//! Frame source abstraction for video decoding backends

use crate::config::VideoConfig;
use crate::core::types::PixelFormat;
use crate::error::{Error, Result};
use std::time::Duration;

/// Image produced by a decoder, before the capture loop stamps it
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Outcome of one [`FrameSource::grab`]
#[derive(Debug)]
pub enum Grab {
    /// A complete decoded image
    Frame(DecodedImage),
    /// Nothing arrived within the grab timeout; try again
    Pending,
    /// The read failed without a decoder error (stream ended, no data)
    Failed,
}

/// Capture handle bound to a UDP media URL.
///
/// `grab()` must return within the backend's grab timeout so the capture loop
/// can notice `stop()`.
pub trait FrameSource: Send {
    /// Open (or re-open) the capture at `url` (`udp://@host:port`)
    fn open(&mut self, url: &str) -> Result<()>;

    /// Whether the capture is usable
    fn is_opened(&self) -> bool;

    /// Decode the next frame
    fn grab(&mut self) -> Result<Grab>;

    /// Release the capture. Safe to call more than once.
    fn release(&mut self);
}

/// Output the video stream draws into (window, overlay, recorder).
///
/// Surfaces are released when the stream stops.
pub trait RenderSurface: Send {
    fn name(&self) -> &str;

    /// Tear the surface down
    fn close(&mut self) -> Result<()>;
}

/// Create the frame source named by `config.backend`
pub fn create_frame_source(config: &VideoConfig) -> Result<Box<dyn FrameSource>> {
    let grab_timeout = Duration::from_millis(config.grab_timeout_ms);

    match config.backend.as_str() {
        "synthetic" => Ok(Box::new(super::synthetic::SyntheticSource::new(
            config.synthetic.clone(),
            grab_timeout,
        ))),
        #[cfg(feature = "ffmpeg")]
        "ffmpeg" => Ok(Box::new(super::ffmpeg::FfmpegSource::new(grab_timeout))),
        #[cfg(not(feature = "ffmpeg"))]
        "ffmpeg" => Err(Error::Config(
            "video backend 'ffmpeg' requires building with --features ffmpeg".to_string(),
        )),
        other => Err(Error::Config(format!("unknown video backend '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_synthetic() {
        let config = VideoConfig {
            backend: "synthetic".to_string(),
            ..Default::default()
        };
        let source = create_frame_source(&config).unwrap();
        assert!(!source.is_opened());
    }

    #[test]
    fn test_default_backend_is_available() {
        let source = create_frame_source(&VideoConfig::default()).unwrap();
        assert!(!source.is_opened());
    }

    #[test]
    fn test_unknown_backend() {
        let config = VideoConfig {
            backend: "opencv".to_string(),
            ..Default::default()
        };
        assert!(matches!(create_frame_source(&config), Err(Error::Config(_))));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_ffmpeg_needs_feature() {
        let config = VideoConfig::default();
        assert!(matches!(create_frame_source(&config), Err(Error::Config(msg)) if msg.contains("ffmpeg")));
    }
}
