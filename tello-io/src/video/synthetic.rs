//! Synthetic frame source for hardware-free runs
//!
//! Produces a scrolling RGB gradient at the configured rate. With
//! `frame_limit` set, reads fail once the limit is reached, which exercises
//! the capture loop's stream-ended path the same way a drone that stops
//! streaming would.
//!
//! ```toml
//! [video]
//! backend = "synthetic"
//!
//! [video.synthetic]
//! width = 320
//! height = 240
//! fps = 15.0
//! frame_limit = 300
//! ```

use super::source::{DecodedImage, FrameSource, Grab};
use crate::config::SyntheticConfig;
use crate::core::types::PixelFormat;
use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Test-pattern frame generator
pub struct SyntheticSource {
    config: SyntheticConfig,
    grab_timeout: Duration,
    opened: bool,
    produced: u64,
    next_due: Instant,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig, grab_timeout: Duration) -> Self {
        Self {
            config,
            grab_timeout,
            opened: false,
            produced: 0,
            next_due: Instant::now(),
        }
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps)
    }

    fn render(&self) -> DecodedImage {
        let width = self.config.width;
        let height = self.config.height;
        let shift = self.produced as u32;
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);

        for y in 0..height {
            for x in 0..width {
                data.push(((x + shift) & 0xff) as u8);
                data.push(((y + shift) & 0xff) as u8);
                data.push((shift & 0xff) as u8);
            }
        }

        DecodedImage {
            width,
            height,
            format: PixelFormat::Rgb24,
            data,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, url: &str) -> Result<()> {
        if !url.starts_with("udp://") {
            return Err(Error::StreamOpen(format!("unsupported URL '{}'", url)));
        }
        self.opened = true;
        self.produced = 0;
        self.next_due = Instant::now();
        log::info!(
            "Synthetic video {}x{} @ {:.1} fps on {}",
            self.config.width,
            self.config.height,
            self.config.fps,
            url
        );
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self) -> Result<Grab> {
        if !self.opened {
            return Err(Error::Decode("synthetic source not open".to_string()));
        }

        if let Some(limit) = self.config.frame_limit {
            if self.produced >= limit {
                return Ok(Grab::Failed);
            }
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > self.grab_timeout {
                thread::sleep(self.grab_timeout);
                return Ok(Grab::Pending);
            }
            thread::sleep(wait);
        }

        self.produced += 1;
        self.next_due += self.frame_period();
        Ok(Grab::Frame(self.render()))
    }

    fn release(&mut self) {
        if self.opened {
            log::debug!("Synthetic video released after {} frames", self.produced);
        }
        self.opened = false;
    }
}
