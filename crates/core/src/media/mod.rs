//! Wire codec: RTP/RTCP framing and codec payload formats.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded access unit is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping): per client and media type.
//! - **Timestamp** (32-bit): 90 kHz for video, the sample rate for audio.
//! - **SSRC** (32-bit): chosen randomly per stream and media type.
//! - **Marker bit**: set on the last packet of an access unit.
//!
//! The codec modules produce [`RtpPayload`]s only. The fan-out prepends a
//! header per client, since every client has its own sequence space.
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) |
//! | RTCP SR | [`rtcp`] | [RFC 3550 §6.4.1](https://tools.ietf.org/html/rfc3550#section-6.4.1) |

pub mod aac;
pub mod h264;
pub mod rtcp;
pub mod rtp;

/// Which elementary stream of a registered stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// SDP control suffix: `track0` is video, `track1` is audio.
    pub fn control(self) -> &'static str {
        match self {
            MediaKind::Video => "track0",
            MediaKind::Audio => "track1",
        }
    }

    /// The other track of the same stream.
    pub fn other(self) -> MediaKind {
        match self {
            MediaKind::Video => MediaKind::Audio,
            MediaKind::Audio => MediaKind::Video,
        }
    }

    pub fn payload_type(self) -> u8 {
        match self {
            MediaKind::Video => rtp::VIDEO_PAYLOAD_TYPE,
            MediaKind::Audio => rtp::AUDIO_PAYLOAD_TYPE,
        }
    }
}

/// One RTP payload plus its marker bit, before a header is stamped on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPayload {
    pub data: Vec<u8>,
    pub marker: bool,
}
