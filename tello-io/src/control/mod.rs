//! Control channel: UDP text commands to the vehicle and its acknowledgements
//!
//! # Thread Model
//!
//! ```text
//! foreground ── send_command() ──▶ UdpSocket ──▶ vehicle :8889
//!                                     ▲
//! control-response thread ◀─ recv ────┘  (log + subscribers)
//! ```
//!
//! The socket is shared as `Arc<UdpSocket>`: sends happen on the caller's
//! thread, receives on `control-response`. `close()` flips the closed flag and
//! drops the channel's handle; the response loop notices within one receive
//! poll interval, reports the closure as a [`Error::Receive`] and exits, which
//! drops the last handle and closes the OS socket.

mod receiver;

pub use receiver::MAX_DATAGRAM_SIZE;

use crate::core::fault::{FaultHandler, LoopKind};
use crate::core::types::Response;
use crate::core::worker::{catch_panic, join_within, spawn_named};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use receiver::{Subscribers, response_loop};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Capacity of each subscriber channel
pub const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Poll intervals a closing channel waits for its response thread
const CLOSE_JOIN_POLLS: u32 = 5;

/// Bidirectional text command exchange with the vehicle.
pub struct ControlChannel {
    /// `None` once closed
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    vehicle_addr: SocketAddr,
    /// Cancellation signal for the response loop
    closed: Arc<AtomicBool>,
    receive_poll: Duration,
    subscribers: Subscribers,
    responses_received: Arc<AtomicU64>,
    response_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Bind `0.0.0.0:local_port` for talking to `vehicle_addr`.
    ///
    /// `receive_poll` bounds how long the response loop can stay blocked after
    /// `close()`. Port 0 picks an ephemeral port.
    pub fn open(local_port: u16, vehicle_addr: SocketAddr, receive_poll: Duration) -> Result<Self> {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], local_port));
        let socket = UdpSocket::bind(bind_addr).map_err(|source| Error::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        socket.set_read_timeout(Some(receive_poll))?;
        let local_addr = socket.local_addr()?;

        log::info!(
            "Control channel bound to {} (vehicle {})",
            local_addr,
            vehicle_addr
        );

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            vehicle_addr,
            closed: Arc::new(AtomicBool::new(false)),
            receive_poll,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            responses_received: Arc::new(AtomicU64::new(0)),
            response_handle: Mutex::new(None),
        })
    }

    /// Address the command socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn vehicle_addr(&self) -> SocketAddr {
        self.vehicle_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of acknowledgements received so far
    pub fn responses_received(&self) -> u64 {
        self.responses_received.load(Ordering::Relaxed)
    }

    /// Send `text` to the vehicle. No acknowledgement is awaited.
    pub fn send_command(&self, text: &str) -> Result<()> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| Error::Send("control channel closed".to_string()))?;

        let sent = socket
            .send_to(text.as_bytes(), self.vehicle_addr)
            .map_err(|e| Error::Send(format!("'{}' to {}: {}", text, self.vehicle_addr, e)))?;
        if sent != text.len() {
            return Err(Error::Send(format!(
                "'{}' truncated ({} of {} bytes)",
                text,
                sent,
                text.len()
            )));
        }

        log::debug!("Sent command: {}", text);
        Ok(())
    }

    /// Subscribe to acknowledgements received from now on
    pub fn subscribe(&self) -> Receiver<Response> {
        let (tx, rx) = bounded(RESPONSE_CHANNEL_CAPACITY);
        self.add_subscriber(tx);
        rx
    }

    /// Forward acknowledgements to an existing sender
    pub fn add_subscriber(&self, tx: Sender<Response>) {
        if !self.is_closed() {
            self.subscribers.lock().push(tx);
        }
    }

    /// Start the `control-response` thread.
    ///
    /// The loop listens for the whole session. When it ends (receive error,
    /// bad UTF-8, or `close()`), the error is reported to `faults` exactly once.
    pub fn start_response_loop(&self, faults: Arc<dyn FaultHandler>) -> Result<()> {
        let mut handle_slot = self.response_handle.lock();
        if handle_slot.is_some() {
            return Err(Error::Other("response loop already running".to_string()));
        }

        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| Error::Receive("control channel closed".to_string()))?;
        let closed = Arc::clone(&self.closed);
        let subscribers = Arc::clone(&self.subscribers);
        let received = Arc::clone(&self.responses_received);

        let handle = spawn_named("control-response", move || {
            log::debug!("Control response loop started");
            let loop_closed = Arc::clone(&closed);
            let error = catch_panic(move || {
                response_loop(socket, loop_closed, subscribers, received)
            })
            .unwrap_or_else(|panic| {
                Error::Receive(format!("control response loop panicked: {}", panic))
            });

            if closed.load(Ordering::Acquire) {
                log::info!("Control response loop stopped: {}", error);
            } else {
                log::error!("Error from UDP control response: {}", error);
            }
            faults.report(LoopKind::ControlResponse, error);
        })?;

        *handle_slot = Some(handle);
        Ok(())
    }

    /// Close the socket. Idempotent: later calls are ignored.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("Control channel already closed");
            return Ok(());
        }

        // Drop our handle; the response thread holds the other one.
        self.socket.lock().take();
        self.subscribers.lock().clear();
        log::info!("Control channel closed");

        let handle = self.response_handle.lock().take();
        match handle {
            Some(handle) => join_within(handle, self.receive_poll * CLOSE_JOIN_POLLS),
            None => Ok(()),
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Control channel cleanup: {}", e);
        }
    }
}
