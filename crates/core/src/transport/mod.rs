//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): accepts RTSP connections, one thread per client
//!   running the request/response loop.
//!
//! - **Interleaved** ([`interleaved`]): the per-connection
//!   [`ConnectionWriter`] shared by signaling responses and `$`-framed
//!   RTP/RTCP (RFC 2326 §10.12).
//!
//! - **UDP** ([`udp`]): one lazily bound outbound socket per client.
//!
//! - **Sender** ([`sender`]): picks the right path for a client and track,
//!   and turns every socket error into a logged soft failure.

pub mod interleaved;
pub mod sender;
pub mod tcp;
pub mod udp;

pub use interleaved::ConnectionWriter;
pub use udp::UdpTransport;

/// RTP data or its RTCP companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Rtp,
    Rtcp,
}
