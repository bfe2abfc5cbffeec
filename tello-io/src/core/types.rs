//! Core data types for acknowledgements, video frames and session lifecycle.
//!
//! - [`Response`]: One acknowledgement/status datagram from the vehicle
//! - [`Frame`]: Immutable decoded video frame, shared as `Arc<Frame>`
//! - [`SessionState`]: `Idle → Starting → Running → ShuttingDown → Terminated`
//! - [`ShutdownReason`]: Why the session ended, and the process exit code for it

use crate::core::fault::LoopKind;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;

/// Exit code for an operator-requested shutdown
pub const EXIT_USER: i32 = 0;

/// Exit code for any failure-triggered shutdown
pub const EXIT_FAILURE: i32 = 1;

/// Timestamped acknowledgement from the vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub received_at: DateTime<Utc>,
    pub from: SocketAddr,
    pub payload: String,
}

/// Pixel layout of [`Frame::data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel
    Rgb24,
    /// 1 byte per pixel
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Decoded video frame.
///
/// Frames are never mutated after construction; the capture loop publishes a
/// new `Arc<Frame>` for every decode.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the capture sequence, starting at 1
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl Frame {
    /// Expected `data` length for the frame geometry
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::ShuttingDown,
            _ => SessionState::Terminated,
        }
    }
}

/// Why a session shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Quit command, Ctrl-C, or end of operator input
    UserRequested(String),
    /// A background loop failed
    LoopFailure { origin: LoopKind, error: String },
    /// Startup could not complete
    StartupFailure(String),
    /// An operator command could not be sent
    CommandFailure(String),
}

impl ShutdownReason {
    /// Process exit code for this reason
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::UserRequested(_) => EXIT_USER,
            ShutdownReason::LoopFailure { .. }
            | ShutdownReason::StartupFailure(_)
            | ShutdownReason::CommandFailure(_) => EXIT_FAILURE,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exit_code() != EXIT_USER
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserRequested(what) => write!(f, "user requested ({})", what),
            ShutdownReason::LoopFailure { origin, error } => {
                write!(f, "{} failed: {}", origin, error)
            }
            ShutdownReason::StartupFailure(error) => write!(f, "startup failed: {}", error),
            ShutdownReason::CommandFailure(error) => write!(f, "command failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ShutdownReason::UserRequested("quit".to_string()).exit_code(),
            0
        );
        let failure = ShutdownReason::LoopFailure {
            origin: LoopKind::VideoCapture,
            error: "stream ended".to_string(),
        };
        assert_eq!(failure.exit_code(), 1);
        assert!(failure.is_failure());
        assert_eq!(failure.to_string(), "video-capture failed: stream ended");
        assert_eq!(
            ShutdownReason::StartupFailure("bind".to_string()).exit_code(),
            1
        );
    }

    #[test]
    fn test_frame_expected_len() {
        let frame = Frame {
            sequence: 1,
            width: 4,
            height: 2,
            format: PixelFormat::Rgb24,
            captured_at: Utc::now(),
            data: vec![0; 24],
        };
        assert_eq!(frame.expected_len(), frame.data.len());
    }
}
