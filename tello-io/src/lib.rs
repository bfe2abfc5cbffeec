//! Tello IO - Host-side controller for UDP-commanded Tello drones
//!
//! Sends text commands to the vehicle, logs every acknowledgement it sends
//! back, and keeps the most recent decoded video frame available while a
//! flight session runs.
//!
//! ## Features
//!
//! - `ffmpeg`: Decode the vehicle's H.264 UDP stream with FFmpeg

pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod session;
pub mod video;

// Re-export commonly used types
pub use config::AppConfig;
pub use crate::core::types::{Frame, Response, SessionState, ShutdownReason};
pub use error::{Error, Result};
pub use session::SessionController;
