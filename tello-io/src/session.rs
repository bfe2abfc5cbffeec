//! Session orchestration: startup sequencing and unified shutdown
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──loops launched──▶ Running
//!   │                  │                            │
//!   └──────────────────┴──── fault / quit ──────────┴──▶ ShuttingDown ──▶ Terminated
//! ```
//!
//! # Startup
//!
//! 1. Open the control channel and start its response loop
//! 2. Send `command` (enter SDK mode), then `streamon`, and wait for both acks
//!    (bounded by `startup_ack_timeout_ms`)
//! 3. Wait `stream_settle_ms`, open the video capture, start the capture loop
//!
//! Any failure on the way shuts the session down with a non-zero status.
//!
//! # Shutdown
//!
//! `shutdown()` may be called from the response loop, the capture loop, the
//! operator prompt and the Ctrl-C handler, all at once. An atomic
//! check-and-set lets exactly one caller run the teardown:
//!
//! 1. Close the control channel (unblocks its response loop)
//! 2. Stop the video stream (capture loop, capture handle, render surfaces)
//! 3. Publish the [`ShutdownReason`] to [`SessionController::wait`]
//!
//! Teardown is best-effort: a failing step is logged and the rest still run.
//! The process itself is ended by the caller of `wait()`.

use crate::config::AppConfig;
use crate::control::{ControlChannel, RESPONSE_CHANNEL_CAPACITY};
use crate::core::fault::{FaultHandler, LoopKind};
use crate::core::types::{Frame, Response, SessionState, ShutdownReason};
use crate::error::{Error, Result};
use crate::video::{FrameSource, VideoStream};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Puts the vehicle into SDK command mode
pub const ACTIVATE_COMMAND: &str = "command";

/// Starts the vehicle's video stream
pub const STREAM_ON_COMMAND: &str = "streamon";

/// Sent in order by `start()`
const STARTUP_COMMANDS: [&str; 2] = [ACTIVATE_COMMAND, STREAM_ON_COMMAND];

/// Owns the control channel and video stream for one flight session.
pub struct SessionController {
    config: AppConfig,
    /// Consumed when the video stream opens
    frame_source: Mutex<Option<Box<dyn FrameSource>>>,
    channel: Mutex<Option<Arc<ControlChannel>>>,
    stream: Mutex<Option<Arc<VideoStream>>>,
    /// Subscribers registered before the channel exists
    pending_subscribers: Mutex<Vec<Sender<Response>>>,
    state: AtomicU8,
    shutting_down: AtomicBool,
    teardown_runs: AtomicU32,
    outcome: Mutex<Option<ShutdownReason>>,
    terminated: Condvar,
}

impl SessionController {
    /// Create an idle session. `frame_source` is the capture handle the video
    /// stream will open.
    pub fn new(config: AppConfig, frame_source: Box<dyn FrameSource>) -> Arc<Self> {
        Arc::new(Self {
            config,
            frame_source: Mutex::new(Some(frame_source)),
            channel: Mutex::new(None),
            stream: Mutex::new(None),
            pending_subscribers: Mutex::new(Vec::new()),
            state: AtomicU8::new(SessionState::Idle as u8),
            shutting_down: AtomicBool::new(false),
            teardown_runs: AtomicU32::new(0),
            outcome: Mutex::new(None),
            terminated: Condvar::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fault handler that routes loop failures into [`Self::shutdown`]
    pub fn fault_handler(self: &Arc<Self>) -> Arc<dyn FaultHandler> {
        Arc::new(SessionFaults(Arc::downgrade(self)))
    }

    /// Open both channels and launch their loops.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                SessionState::Idle as u8,
                SessionState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::Other(format!(
                "session cannot start from state {:?}",
                self.state()
            )));
        }

        log::info!("Starting session");
        let faults = self.fault_handler();
        let control = &self.config.control;

        let vehicle_addr = control
            .vehicle_addr()
            .or_else(|e| self.abort_start(e))?;
        let channel = ControlChannel::open(
            control.local_port,
            vehicle_addr,
            Duration::from_millis(control.receive_poll_ms),
        )
        .map(Arc::new)
        .or_else(|e| self.abort_start(e))?;
        *self.channel.lock() = Some(Arc::clone(&channel));
        self.ensure_live()?;

        let pending: Vec<_> = self.pending_subscribers.lock().drain(..).collect();
        for tx in pending {
            channel.add_subscriber(tx);
        }

        channel
            .start_response_loop(Arc::clone(&faults))
            .or_else(|e| self.abort_start(e))?;

        let startup_acks = channel.subscribe();
        for command in STARTUP_COMMANDS {
            channel
                .send_command(command)
                .or_else(|e| self.abort_start(e))?;
        }
        self.await_startup_acks(&startup_acks);
        drop(startup_acks);
        self.ensure_live()?;
        log::info!("In SDK mode, and stream is on");

        if control.stream_settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(control.stream_settle_ms));
        }

        let source = self.frame_source.lock().take();
        let source = source
            .ok_or_else(|| Error::StreamOpen("frame source already consumed".to_string()))
            .or_else(|e| self.abort_start(e))?;
        let stream = VideoStream::open(&self.config.video, source)
            .map(Arc::new)
            .or_else(|e| self.abort_start(e))?;
        *self.stream.lock() = Some(Arc::clone(&stream));
        self.ensure_live()?;

        stream
            .start_capture_loop(faults)
            .or_else(|e| self.abort_start(e))?;

        // A loop may already have failed and begun shutting down
        if self
            .state
            .compare_exchange(
                SessionState::Starting as u8,
                SessionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::Other(
                "session shut down before it finished starting".to_string(),
            ));
        }

        log::info!("Session running");
        Ok(())
    }

    /// Wait until both startup commands are acknowledged, so their acks are
    /// logged before any frame is requested. Lost acks are not retried: after
    /// `startup_ack_timeout_ms` startup carries on with a warning.
    fn await_startup_acks(&self, acks: &Receiver<Response>) {
        let expected = STARTUP_COMMANDS.len();
        let timeout = Duration::from_millis(self.config.control.startup_ack_timeout_ms);
        let deadline = Instant::now() + timeout;
        let mut received = 0;

        while received < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match acks.recv_timeout(remaining) {
                Ok(ack) => {
                    received += 1;
                    log::debug!("Startup ack {}/{}: {}", received, expected, ack.payload);
                }
                Err(_) => {
                    log::warn!(
                        "Received {} of {} startup acks within {:?}",
                        received,
                        expected,
                        timeout
                    );
                    return;
                }
            }
        }
    }

    /// Fail startup if a shutdown began meanwhile. Resources stored before
    /// the teardown looked at them are released here instead.
    fn ensure_live(&self) -> Result<()> {
        if !self.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }
        let channel = self.channel.lock().clone();
        if let Some(Err(e)) = channel.map(|c| c.close()) {
            log::warn!("Error trying to shut down control channel: {}", e);
        }
        let stream = self.stream.lock().clone();
        if let Some(Err(e)) = stream.map(|s| s.stop()) {
            log::warn!("Error shutting down video stream: {}", e);
        }
        Err(Error::Shutdown(
            "session shut down while starting".to_string(),
        ))
    }

    /// Shut down for a startup failure and hand the error back
    fn abort_start<T>(&self, error: Error) -> Result<T> {
        log::error!("Session startup failed: {}", error);
        self.shutdown(ShutdownReason::StartupFailure(error.to_string()));
        Err(error)
    }

    /// Forward operator input to the vehicle.
    ///
    /// The quit command ends the session (exit 0) and is never sent. A send
    /// failure ends the session with a failure status.
    pub fn send_user_command(&self, text: &str) -> Result<()> {
        if self.is_quit_command(text) {
            self.shutdown(ShutdownReason::UserRequested("quit command".to_string()));
            return Ok(());
        }

        let channel = self
            .channel
            .lock()
            .clone()
            .ok_or_else(|| Error::Send("session not started".to_string()))?;

        if let Err(e) = channel.send_command(text) {
            log::error!("Error sending data to Tello: {}", e);
            self.shutdown(ShutdownReason::CommandFailure(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Whether `text` is the operator's quit command
    pub fn is_quit_command(&self, text: &str) -> bool {
        text == self.config.control.quit_command
    }

    /// Subscribe to vehicle acknowledgements. Works before `start()`.
    pub fn subscribe_responses(&self) -> Receiver<Response> {
        if let Some(channel) = self.channel.lock().as_ref() {
            return channel.subscribe();
        }
        let (tx, rx) = bounded(RESPONSE_CHANNEL_CAPACITY);
        self.pending_subscribers.lock().push(tx);
        rx
    }

    /// Latest video frame, if the stream has produced one
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.stream.lock().as_ref().and_then(|s| s.current_frame())
    }

    /// Acknowledgements received so far
    pub fn responses_received(&self) -> u64 {
        self.channel
            .lock()
            .as_ref()
            .map_or(0, |c| c.responses_received())
    }

    /// Video frames captured so far
    pub fn frames_captured(&self) -> u64 {
        self.stream
            .lock()
            .as_ref()
            .map_or(0, |s| s.frames_captured())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// How many times the teardown body has run (0 or 1)
    pub fn teardown_runs(&self) -> u32 {
        self.teardown_runs.load(Ordering::Acquire)
    }

    /// Tear the session down. Returns true for the one caller that ran the
    /// teardown; every other call is a no-op returning false.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Shutdown already in progress, ignoring: {}", reason);
            return false;
        }

        self.state
            .store(SessionState::ShuttingDown as u8, Ordering::Release);
        self.teardown_runs.fetch_add(1, Ordering::AcqRel);

        if reason.is_failure() {
            log::error!("Shutting down: {}", reason);
        } else {
            log::info!("Shutting down: {}", reason);
        }

        let channel = self.channel.lock().clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.close() {
                log::warn!("Error trying to shut down control channel: {}", e);
            }
        }

        let stream = self.stream.lock().clone();
        if let Some(stream) = stream {
            if let Err(e) = stream.stop() {
                log::warn!("Error shutting down video stream: {}", e);
            }
        }

        // Startup never reached the video stage
        if let Some(mut source) = self.frame_source.lock().take() {
            source.release();
        }
        self.pending_subscribers.lock().clear();

        let code = reason.exit_code();
        {
            let mut outcome = self.outcome.lock();
            *outcome = Some(reason);
            self.state
                .store(SessionState::Terminated as u8, Ordering::Release);
            self.terminated.notify_all();
        }

        log::info!("Session terminated (exit code {})", code);
        true
    }

    /// Block until the session has terminated
    pub fn wait(&self) -> ShutdownReason {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(reason) = outcome.as_ref() {
                return reason.clone();
            }
            self.terminated.wait(&mut outcome);
        }
    }

    /// Like [`Self::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(reason) = outcome.as_ref() {
                return Some(reason.clone());
            }
            if self.terminated.wait_until(&mut outcome, deadline).timed_out() {
                return outcome.clone();
            }
        }
    }
}

/// Routes background-loop faults into session shutdown.
///
/// Holds a weak reference so the loops never keep a finished session alive.
struct SessionFaults(Weak<SessionController>);

impl FaultHandler for SessionFaults {
    fn report(&self, origin: LoopKind, error: Error) {
        match self.0.upgrade() {
            Some(session) => {
                session.shutdown(ShutdownReason::LoopFailure {
                    origin,
                    error: error.to_string(),
                });
            }
            None => log::debug!("{} fault after session dropped: {}", origin, error),
        }
    }
}
