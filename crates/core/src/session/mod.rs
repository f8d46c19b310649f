//! Per-client RTSP session state (RFC 2326 §3, §12.37).
//!
//! A [`ClientSession`] is created on the first successful SETUP of a
//! connection and lives until that connection closes. It tracks:
//!
//! - The client id (peer `address:port`) and the opaque session token
//!   returned in the `Session` header.
//! - The subscribed stream path.
//! - Negotiated [`Delivery`] per track (TCP-interleaved channels or UDP ports).
//! - The playback state: Ready -> Playing <-> Paused.
//! - Independent RTP sequence counters for video and audio.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP          -> Ready
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! PLAY           -> Playing  (from Paused)
//! TEARDOWN       -> Ready    (transport kept until the connection closes)
//! TCP disconnect -> (removed, via cleanup)
//! ```

pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtspError};
use crate::media::MediaKind;
use crate::transport::ConnectionWriter;
use crate::transport::udp::UdpTransport;
pub use transport::{Delivery, TransportHeader};

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport negotiated via SETUP, not playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
}

/// Random 16-hex-digit session token.
pub fn generate_session_id() -> String {
    format!("{:016X}", rand::random::<u64>())
}

/// State of one client subscribed to a stream.
///
/// Shared between the connection's signaling thread and the producer
/// threads fanning out media, so all mutable state sits behind
/// `parking_lot` locks or atomics. Writes to the RTSP connection go through
/// the [`ConnectionWriter`], whose lock serializes responses and
/// interleaved media.
pub struct ClientSession {
    /// Peer `address:port`; unique per connection.
    pub id: String,
    pub peer_addr: SocketAddr,
    /// Token issued at SETUP and echoed by the client afterwards.
    pub session_id: String,
    /// Registered stream path this client subscribed to.
    pub path: String,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
    writer: Arc<ConnectionWriter>,
    udp: Mutex<Option<UdpTransport>>,
    video: RwLock<Option<Delivery>>,
    audio: RwLock<Option<Delivery>>,
    state: RwLock<SessionState>,
    video_sequence: AtomicU16,
    audio_sequence: AtomicU16,
}

impl ClientSession {
    /// Create a session whose sequence counters start at the given values.
    pub fn new(
        peer_addr: SocketAddr,
        path: &str,
        writer: Arc<ConnectionWriter>,
        timeout_secs: u64,
        start_sequences: (u16, u16),
    ) -> Self {
        Self {
            id: peer_addr.to_string(),
            peer_addr,
            session_id: generate_session_id(),
            path: path.to_string(),
            timeout_secs,
            writer,
            udp: Mutex::new(None),
            video: RwLock::new(None),
            audio: RwLock::new(None),
            state: RwLock::new(SessionState::Ready),
            video_sequence: AtomicU16::new(start_sequences.0),
            audio_sequence: AtomicU16::new(start_sequences.1),
        }
    }

    /// Record the negotiated delivery for a track (called during SETUP).
    pub fn set_delivery(&self, kind: MediaKind, delivery: Delivery) {
        tracing::debug!(client = %self.id, ?kind, ?delivery, "transport configured");
        match kind {
            MediaKind::Video => *self.video.write() = Some(delivery),
            MediaKind::Audio => *self.audio.write() = Some(delivery),
        }
    }

    /// Negotiated delivery for a track, if SETUP was done for it.
    pub fn delivery(&self, kind: MediaKind) -> Option<Delivery> {
        match kind {
            MediaKind::Video => *self.video.read(),
            MediaKind::Audio => *self.audio.read(),
        }
    }

    /// Transition to a new playback state.
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(client = %self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether this session is actively receiving media.
    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// Allocate the next RTP sequence number for a media type.
    ///
    /// Counters are independent per media type and wrap modulo 2^16.
    pub fn next_sequence(&self, kind: MediaKind) -> u16 {
        self.sequence_counter(kind).fetch_add(1, Ordering::SeqCst)
    }

    /// Sequence number the next packet of `kind` will carry (for `RTP-Info`).
    pub fn peek_sequence(&self, kind: MediaKind) -> u16 {
        self.sequence_counter(kind).load(Ordering::SeqCst)
    }

    fn sequence_counter(&self, kind: MediaKind) -> &AtomicU16 {
        match kind {
            MediaKind::Video => &self.video_sequence,
            MediaKind::Audio => &self.audio_sequence,
        }
    }

    pub fn writer(&self) -> &ConnectionWriter {
        &self.writer
    }

    /// Run `f` with this client's outbound UDP socket, creating it on first use.
    pub(crate) fn with_udp<T>(&self, f: impl FnOnce(&UdpTransport) -> Result<T>) -> Result<T> {
        let mut slot = self.udp.lock();
        let udp = match slot.take() {
            Some(udp) => udp,
            None => {
                let udp = UdpTransport::bind_for(self.peer_addr)?;
                tracing::debug!(client = %self.id, "UDP send socket created");
                udp
            }
        };
        let result = f(&udp);
        *slot = Some(udp);
        result
    }

    /// Close the connection and drop the UDP socket.
    pub fn close(&self) {
        self.writer.shutdown();
        self.udp.lock().take();
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"3F2A9C0D11E4B765;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.session_id, self.timeout_secs)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("path", &self.path)
            .field("state", &self.state())
            .field("video", &self.delivery(MediaKind::Video))
            .field("audio", &self.delivery(MediaKind::Audio))
            .finish()
    }
}

/// Allocator of server-side UDP port pairs advertised at SETUP.
///
/// Ports come from a monotonic counter starting at 5000 so concurrent
/// SETUPs never receive the same pair. When the range is exhausted
/// (> 65534), it wraps back to 5000. Per RFC 3550 §11, RTP ports are even
/// and RTCP = RTP + 1.
#[derive(Clone)]
pub struct PortAllocator {
    next_server_port: Arc<AtomicU64>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN)),
        }
    }

    /// Allocate a pair of (RTP, RTCP) server ports.
    pub fn allocate(&self) -> Result<(u16, u16)> {
        let mut rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp > SERVER_PORT_MAX {
            tracing::warn!(rtp, "port range exhausted, wrapping to {SERVER_PORT_MIN}");
            self.next_server_port
                .store(SERVER_PORT_MIN, Ordering::SeqCst);
            rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
        }

        let rtp = u16::try_from(rtp).map_err(|_| RtspError::PortRangeExhausted)?;
        let rtcp = rtp.checked_add(1).ok_or(RtspError::PortRangeExhausted)?;

        tracing::trace!(rtp_port = rtp, rtcp_port = rtcp, "allocated server ports");
        Ok((rtp, rtcp))
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session(start: (u16, u16)) -> ClientSession {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        ClientSession::new(
            addr,
            "live",
            Arc::new(ConnectionWriter::from_writer(std::io::sink())),
            DEFAULT_SESSION_TIMEOUT_SECS,
            start,
        )
    }

    #[test]
    fn id_is_peer_address() {
        let s = make_session((0, 0));
        assert_eq!(s.id, "127.0.0.1:40000");
        assert_eq!(s.session_id.len(), 16);
        assert!(s.session_header_value().ends_with(";timeout=60"));
    }

    #[test]
    fn sequences_independent_per_media() {
        let s = make_session((10, 500));
        assert_eq!(s.next_sequence(MediaKind::Video), 10);
        assert_eq!(s.next_sequence(MediaKind::Video), 11);
        assert_eq!(s.next_sequence(MediaKind::Audio), 500);
        assert_eq!(s.peek_sequence(MediaKind::Video), 12);
        assert_eq!(s.peek_sequence(MediaKind::Audio), 501);
    }

    #[test]
    fn sequence_wraps() {
        let s = make_session((u16::MAX, 0));
        assert_eq!(s.next_sequence(MediaKind::Video), u16::MAX);
        assert_eq!(s.next_sequence(MediaKind::Video), 0);
    }

    #[test]
    fn state_transitions() {
        let s = make_session((0, 0));
        assert_eq!(s.state(), SessionState::Ready);
        assert!(!s.is_playing());
        s.set_state(SessionState::Playing);
        assert!(s.is_playing());
        s.set_state(SessionState::Paused);
        assert!(!s.is_playing());
    }

    #[test]
    fn delivery_per_track() {
        let s = make_session((0, 0));
        assert!(s.delivery(MediaKind::Video).is_none());
        let d = Delivery::Interleaved {
            rtp_channel: 2,
            rtcp_channel: 3,
        };
        s.set_delivery(MediaKind::Audio, d);
        assert_eq!(s.delivery(MediaKind::Audio), Some(d));
        assert!(s.delivery(MediaKind::Video).is_none());
    }

    #[test]
    fn session_ids_differ() {
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[test]
    fn ports_even_and_paired() {
        let ports = PortAllocator::new();
        assert_eq!(ports.allocate().unwrap(), (5000, 5001));
        assert_eq!(ports.allocate().unwrap(), (5002, 5003));
    }

    #[test]
    fn ports_wrap() {
        let ports = PortAllocator::new();
        ports
            .next_server_port
            .store(SERVER_PORT_MAX + 1, Ordering::SeqCst);
        assert_eq!(ports.allocate().unwrap(), (5000, 5001));
    }
}
