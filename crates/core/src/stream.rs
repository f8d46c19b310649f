use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtspError};
use crate::media::MediaKind;
use crate::media::rtp::random_ssrc;
use crate::session::ClientSession;

/// Static description of a stream, supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Unique key, e.g. `live`. Leading/trailing slashes are ignored.
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Video bitrate in bits per second.
    pub video_bitrate: u32,
    pub frame_rate: u32,
    pub audio_enabled: bool,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl StreamDescriptor {
    /// Video-only stream.
    pub fn video(path: &str, width: u32, height: u32, video_bitrate: u32, frame_rate: u32) -> Self {
        Self {
            path: normalize_path(path).to_string(),
            width,
            height,
            video_bitrate,
            frame_rate,
            audio_enabled: false,
            audio_sample_rate: 0,
            audio_channels: 0,
        }
    }

    /// Enable an AAC audio track.
    pub fn with_audio(mut self, sample_rate: u32, channels: u8) -> Self {
        self.audio_enabled = true;
        self.audio_sample_rate = sample_rate;
        self.audio_channels = channels;
        self
    }
}

/// Video codec parameter sets (SPS and PPS), stored without start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

/// Snapshot of per-stream delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub clients: usize,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub bytes_sent: u64,
}

/// One registered stream: codec state plus its subscribed clients.
///
/// Signaling threads insert and remove clients; producer threads take
/// snapshots of the playing ones. The client map sits behind an `RwLock`
/// that is never held across a socket write.
pub struct StreamInstance {
    descriptor: StreamDescriptor,
    video_ssrc: u32,
    audio_ssrc: u32,
    video_params: RwLock<Option<Arc<VideoParameterSets>>>,
    audio_config: RwLock<Option<Arc<Vec<u8>>>>,
    /// Payloads generated per media type; new clients start their
    /// sequence numbers here.
    video_sequence: AtomicU16,
    audio_sequence: AtomicU16,
    last_video_rtcp: Mutex<Option<Instant>>,
    last_audio_rtcp: Mutex<Option<Instant>>,
    key_frame_requested: AtomicBool,
    clients: RwLock<HashMap<String, Arc<ClientSession>>>,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    bytes_sent: AtomicU64,
}

impl StreamInstance {
    pub fn new(descriptor: StreamDescriptor) -> Self {
        let video_ssrc = random_ssrc();
        let mut audio_ssrc = random_ssrc();
        while audio_ssrc == video_ssrc {
            audio_ssrc = random_ssrc();
        }
        Self {
            descriptor,
            video_ssrc,
            audio_ssrc,
            video_params: RwLock::new(None),
            audio_config: RwLock::new(None),
            video_sequence: AtomicU16::new(0),
            audio_sequence: AtomicU16::new(0),
            last_video_rtcp: Mutex::new(None),
            last_audio_rtcp: Mutex::new(None),
            key_frame_requested: AtomicBool::new(false),
            clients: RwLock::new(HashMap::new()),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.descriptor.path
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Fixed SSRC of the video or audio source.
    pub fn ssrc(&self, kind: MediaKind) -> u32 {
        match kind {
            MediaKind::Video => self.video_ssrc,
            MediaKind::Audio => self.audio_ssrc,
        }
    }

    /// Store (or replace, after an encoder restart) the video parameter sets.
    pub fn set_video_parameter_sets(&self, sps: &[u8], pps: &[u8]) {
        *self.video_params.write() = Some(Arc::new(VideoParameterSets {
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        }));
        tracing::debug!(path = %self.path(), sps_len = sps.len(), pps_len = pps.len(), "video parameter sets updated");
    }

    /// Forget the video parameter sets until the encoder delivers new ones.
    pub fn clear_video_parameter_sets(&self) {
        self.video_params.write().take();
        tracing::debug!(path = %self.path(), "video parameter sets cleared");
    }

    pub fn video_parameter_sets(&self) -> Option<Arc<VideoParameterSets>> {
        self.video_params.read().clone()
    }

    pub fn set_audio_config(&self, config: &[u8]) {
        *self.audio_config.write() = Some(Arc::new(config.to_vec()));
        tracing::debug!(path = %self.path(), config_len = config.len(), "audio config updated");
    }

    pub fn audio_config(&self) -> Option<Arc<Vec<u8>>> {
        self.audio_config.read().clone()
    }

    /// Starting (video, audio) sequence numbers for a new subscriber.
    pub fn start_sequences(&self) -> (u16, u16) {
        (
            self.video_sequence.load(Ordering::SeqCst),
            self.audio_sequence.load(Ordering::SeqCst),
        )
    }

    /// Account for `count` payloads generated for `kind`.
    pub fn advance_sequence(&self, kind: MediaKind, count: usize) {
        let counter = match kind {
            MediaKind::Video => &self.video_sequence,
            MediaKind::Audio => &self.audio_sequence,
        };
        // Truncation is the modulo-2^16 wrap.
        counter.fetch_add(count as u16, Ordering::SeqCst);
    }

    /// Add a client. Returns the new client count.
    pub fn add_client(&self, client: Arc<ClientSession>) -> usize {
        let mut clients = self.clients.write();
        tracing::debug!(path = %self.path(), client = %client.id, "client subscribed");
        clients.insert(client.id.clone(), client);
        clients.len()
    }

    /// Remove a client. Returns the remaining count, or `None` if the
    /// client was not subscribed (so callers notify exactly once).
    pub fn remove_client(&self, client_id: &str) -> Option<usize> {
        let mut clients = self.clients.write();
        clients.remove(client_id).map(|_| {
            tracing::debug!(path = %self.path(), client = client_id, "client unsubscribed");
            clients.len()
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Snapshot of clients currently in the Playing state.
    pub fn playing_clients(&self) -> Vec<Arc<ClientSession>> {
        self.clients
            .read()
            .values()
            .filter(|c| c.is_playing())
            .cloned()
            .collect()
    }

    /// Snapshot of every subscribed client.
    pub fn clients(&self) -> Vec<Arc<ClientSession>> {
        self.clients.read().values().cloned().collect()
    }

    /// Whether a Sender Report is due on the `kind` track; if so, marks it
    /// as sent at `now`.
    pub fn take_rtcp_slot(&self, kind: MediaKind, now: Instant, interval: Duration) -> bool {
        let mut last = match kind {
            MediaKind::Video => self.last_video_rtcp.lock(),
            MediaKind::Audio => self.last_audio_rtcp.lock(),
        };
        match *last {
            Some(sent) if now.saturating_duration_since(sent) < interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Latch a one-shot key frame request.
    pub fn request_key_frame(&self) {
        self.key_frame_requested.store(true, Ordering::SeqCst);
    }

    /// Consume the key frame request, returning whether one was pending.
    pub fn take_key_frame_request(&self) -> bool {
        self.key_frame_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn record_frame(&self, kind: MediaKind, bytes_sent: u64) {
        let frames = match kind {
            MediaKind::Video => &self.video_frames,
            MediaKind::Audio => &self.audio_frames,
        };
        frames.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            clients: self.client_count(),
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Registry of named streams, keyed by path.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<StreamInstance>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Paths are unique.
    pub fn register(&self, descriptor: StreamDescriptor) -> Result<Arc<StreamInstance>> {
        let mut descriptor = descriptor;
        descriptor.path = normalize_path(&descriptor.path).to_string();

        let mut streams = self.streams.write();
        if streams.contains_key(&descriptor.path) {
            return Err(RtspError::StreamAlreadyRegistered(descriptor.path));
        }

        tracing::info!(
            path = %descriptor.path,
            width = descriptor.width,
            height = descriptor.height,
            fps = descriptor.frame_rate,
            audio = descriptor.audio_enabled,
            "stream registered"
        );
        let stream = Arc::new(StreamInstance::new(descriptor));
        streams.insert(stream.path().to_string(), stream.clone());
        Ok(stream)
    }

    /// Look up a stream by exact path.
    pub fn get(&self, path: &str) -> Option<Arc<StreamInstance>> {
        self.streams.read().get(normalize_path(path)).cloned()
    }

    /// Resolve a stream from an RTSP request target.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<StreamInstance>> {
        extract_stream_path(uri).and_then(|path| self.get(path))
    }

    pub fn streams(&self) -> Vec<Arc<StreamInstance>> {
        self.streams.read().values().cloned().collect()
    }

    /// Clients across all streams.
    pub fn total_client_count(&self) -> usize {
        self.streams.read().values().map(|s| s.client_count()).sum()
    }
}

fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

fn is_track_segment(segment: &str) -> bool {
    segment
        .strip_prefix("track")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Extract the stream path from an RTSP request target.
///
/// Takes the last non-empty path segment after dropping the query, the
/// authority (`host:port`) and a trailing `trackN` suffix.
///
/// `rtsp://host:8554/live/track1` → `live`
/// `rtsp://host:8554/cam/live?x=1` → `live`
/// `/live`                         → `live`
/// `rtsp://host:8554`              → `None`
pub fn extract_stream_path(uri: &str) -> Option<&str> {
    let uri = uri.split(['?', '#']).next().unwrap_or(uri);

    let path = match uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        Some(after) => after.find('/').map(|slash| &after[slash..])?,
        None => uri,
    };

    let mut segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .collect();

    if segments.last().is_some_and(|s| is_track_segment(s)) {
        segments.pop();
    }
    segments.last().copied()
}

/// Which track a request target addresses: `track1` is audio, anything
/// else is video.
pub fn track_from_uri(uri: &str) -> MediaKind {
    let uri = uri.split(['?', '#']).next().unwrap_or(uri);
    match uri.trim_end_matches('/').rsplit('/').next() {
        Some("track1") => MediaKind::Audio,
        _ => MediaKind::Video,
    }
}
