//! Shared fixtures: a loopback stand-in for the vehicle and an instrumented
//! frame source.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tello_io::config::AppConfig;
use tello_io::core::types::PixelFormat;
use tello_io::error::{Error, Result};
use tello_io::video::{DecodedImage, FrameSource, Grab};

/// Command received by the mock vehicle
#[derive(Debug, Clone)]
pub struct Received {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// UDP responder on 127.0.0.1 that records each command and answers it.
pub struct MockVehicle {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<Received>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockVehicle {
    /// Answer every command with "ok"
    pub fn start() -> Self {
        Self::with_reply(|_| "ok".to_string())
    }

    /// Answer every command with `reply(command)`
    pub fn with_reply(reply: fn(&str) -> String) -> Self {
        Self::spawn(reply, Duration::ZERO)
    }

    /// Answer "ok", but only after `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self::spawn(|_| "ok".to_string(), delay)
    }

    fn spawn(reply: fn(&str) -> String, delay: Duration) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let log = Arc::clone(&commands);
        let alive = Arc::clone(&running);
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1518];
            while alive.load(Ordering::Relaxed) {
                let (len, from) = match socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let text = String::from_utf8_lossy(&buf[..len]).to_string();
                log.lock().push(Received {
                    at: Utc::now(),
                    text: text.clone(),
                });
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let _ = socket.send_to(reply(&text).as_bytes(), from);
            }
        });

        Self {
            addr,
            commands,
            running,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().iter().map(|c| c.text.clone()).collect()
    }

    /// Wait until at least `count` commands arrived
    pub fn wait_for_commands(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        while self.commands.lock().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.commands()
    }
}

impl Drop for MockVehicle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Session config pointed at `vehicle`, with fast polling and synthetic video
pub fn test_config(vehicle: &MockVehicle) -> AppConfig {
    let mut config = AppConfig::default();
    config.control.local_port = 0;
    config.control.vehicle_address = vehicle.addr().to_string();
    config.control.receive_poll_ms = 20;
    config.video.backend = "synthetic".to_string();
    config.video.grab_timeout_ms = 20;
    config.video.stop_timeout_ms = 1000;
    config.video.synthetic.width = 8;
    config.video.synthetic.height = 6;
    config.video.synthetic.fps = 100.0;
    config
}

/// What the instrumented source observed
#[derive(Default)]
pub struct SourceLog {
    pub open_attempts: u32,
    pub first_grab: Option<DateTime<Utc>>,
    pub grabs: u64,
    pub released: bool,
}

/// Frame source that records its calls. Produces small gray frames, fails
/// reads after `frame_limit` frames, and never opens when `opens` is false.
pub struct RecordingSource {
    log: Arc<Mutex<SourceLog>>,
    opens: bool,
    opened: bool,
    frame_limit: Option<u64>,
}

impl RecordingSource {
    pub fn new(opens: bool, frame_limit: Option<u64>) -> (Self, Arc<Mutex<SourceLog>>) {
        let log = Arc::new(Mutex::new(SourceLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                opens,
                opened: false,
                frame_limit,
            },
            log,
        )
    }
}

impl FrameSource for RecordingSource {
    fn open(&mut self, _url: &str) -> Result<()> {
        self.log.lock().open_attempts += 1;
        if !self.opens {
            return Err(Error::StreamOpen("no video on this port".to_string()));
        }
        self.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self) -> Result<Grab> {
        let grabs = {
            let mut log = self.log.lock();
            log.first_grab.get_or_insert_with(Utc::now);
            log.grabs += 1;
            log.grabs
        };

        if self.frame_limit.is_some_and(|limit| grabs > limit) {
            return Ok(Grab::Failed);
        }

        thread::sleep(Duration::from_millis(5));
        Ok(Grab::Frame(DecodedImage {
            width: 4,
            height: 2,
            format: PixelFormat::Gray8,
            data: vec![grabs as u8; 8],
        }))
    }

    fn release(&mut self) {
        self.opened = false;
        self.log.lock().released = true;
    }
}
