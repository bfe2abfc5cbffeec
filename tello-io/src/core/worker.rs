//! Named background threads with bounded joins.

use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Spawn a named thread
pub fn spawn_named<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| Error::Other(format!("Failed to spawn {} thread: {}", name, e)))
}

/// Run a loop body, turning a panic into its message.
///
/// Loop threads use this so a panic still reaches the fault handler instead
/// of silently killing the thread.
pub fn catch_panic<T, F>(body: F) -> std::result::Result<T, String>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Join `handle`, giving up after `timeout`.
///
/// A thread cannot join itself: when called from the worker (a loop that
/// triggered the shutdown), this returns immediately and the worker exits on
/// its own once the caller unwinds back into the loop. On timeout the thread
/// is detached.
pub fn join_within(handle: JoinHandle<()>, timeout: Duration) -> Result<()> {
    let name = handle.thread().name().unwrap_or("worker").to_string();

    if handle.thread().id() == thread::current().id() {
        log::debug!("{} stopping itself, skipping join", name);
        return Ok(());
    }

    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(Error::Shutdown(format!(
                "{} thread did not exit within {:?}",
                name, timeout
            )));
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    handle
        .join()
        .map_err(|_| Error::Shutdown(format!("{} thread panicked", name)))
}
