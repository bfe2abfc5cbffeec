//! Response loop for the control channel
//!
//! Receives acknowledgement/status datagrams from the vehicle, logs each one
//! with a UTC timestamp and forwards it to subscribers.

use crate::core::types::Response;
use crate::error::Error;
use chrono::Utc;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Largest datagram the vehicle sends (Ethernet frame size)
pub const MAX_DATAGRAM_SIZE: usize = 1518;

/// Response subscribers, one bounded sender each
pub(super) type Subscribers = Arc<Mutex<Vec<Sender<Response>>>>;

/// Receive loop - runs until the socket fails, a payload is not UTF-8, or the
/// channel is closed.
///
/// The socket carries a read timeout, so a blocked receive wakes up at least
/// once per poll interval and sees `closed`. That is how `close()` from
/// another thread turns into an error here instead of a hang.
///
/// Always returns the error that ended the loop.
pub(super) fn response_loop(
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    subscribers: Subscribers,
    received: Arc<AtomicU64>,
) -> Error {
    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        if closed.load(Ordering::Acquire) {
            return Error::Receive("control socket closed".to_string());
        }

        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Error::Receive(e.to_string()),
        };

        let payload = match std::str::from_utf8(&buffer[..len]) {
            Ok(text) => text.to_string(),
            Err(e) => {
                return Error::Receive(format!("invalid UTF-8 from {}: {}", from, e));
            }
        };

        let response = Response {
            received_at: Utc::now(),
            from,
            payload,
        };

        log::info!("From Tello: {}", response.payload);
        received.fetch_add(1, Ordering::Relaxed);
        publish(&subscribers, response);
    }
}

/// Hand a response to every live subscriber.
///
/// Subscribers that are full lose this record (the log line is already
/// written); disconnected ones are dropped.
fn publish(subscribers: &Subscribers, response: Response) {
    let mut subs = subscribers.lock();
    subs.retain(|tx| match tx.try_send(response.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("Response subscriber full, dropped: {}", response.payload);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}
