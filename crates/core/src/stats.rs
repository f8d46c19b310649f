//! Bandwidth accounting over rolling one-second windows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    started: Instant,
    current: u64,
    last: u64,
}

/// Byte counter reporting the total of the last completed one-second window.
#[derive(Debug)]
pub struct RateCounter {
    window: Mutex<Window>,
}

impl RateCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            window: Mutex::new(Window {
                started: now,
                current: 0,
                last: 0,
            }),
        }
    }

    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.rate_at(Instant::now())
    }

    fn record_at(&self, now: Instant, bytes: u64) {
        let mut window = self.window.lock();
        roll(&mut window, now);
        window.current += bytes;
    }

    fn rate_at(&self, now: Instant) -> u64 {
        let mut window = self.window.lock();
        roll(&mut window, now);
        window.last
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Close the current window if a second has passed. A gap longer than one
/// window means the last completed second saw no traffic.
fn roll(window: &mut Window, now: Instant) {
    let elapsed = now.saturating_duration_since(window.started);
    if elapsed < WINDOW {
        return;
    }
    window.last = if elapsed < WINDOW * 2 { window.current } else { 0 };
    window.current = 0;
    window.started = now;
    tracing::trace!(bytes_per_second = window.last, "bandwidth window rolled");
}

/// Upload (media and responses sent) and download (requests received)
/// rates shared by every connection and producer.
#[derive(Debug, Clone, Default)]
pub struct Bandwidth {
    upload: Arc<RateCounter>,
    download: Arc<RateCounter>,
}

impl Bandwidth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upload(&self, bytes: usize) {
        self.upload.record(bytes as u64);
    }

    pub fn record_download(&self, bytes: usize) {
        self.download.record(bytes as u64);
    }

    pub fn upload_bytes_per_second(&self) -> u64 {
        self.upload.bytes_per_second()
    }

    pub fn download_bytes_per_second(&self) -> u64 {
        self.download.bytes_per_second()
    }
}
