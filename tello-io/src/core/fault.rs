//! FaultHandler trait definition

use crate::error::Error;
use std::fmt;

/// Background loop that raised a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `control-response` thread
    ControlResponse,
    /// `video-capture` thread
    VideoCapture,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::ControlResponse => write!(f, "control-response"),
            LoopKind::VideoCapture => write!(f, "video-capture"),
        }
    }
}

/// Receiver of unrecoverable background-loop errors.
///
/// Every error inside a loop is terminal for the session. The loop logs it,
/// calls [`FaultHandler::report`] once, and exits. Implementations must be
/// safe to call from several loops at the same time.
pub trait FaultHandler: Send + Sync {
    /// Report a fault from `origin`
    fn report(&self, origin: LoopKind, error: Error);
}
