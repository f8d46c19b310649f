/// RTP payload type used for H.264 video (dynamic range, RFC 3551).
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;

/// RTP payload type used for AAC audio.
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

/// Video media clock in Hz (RFC 6184 §8.1).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Generic RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Sequence numbers are owned by each client (see
/// [`ClientSession`](crate::session::ClientSession)), so the header is a
/// plain value: the fan-out builds one payload per access unit and stamps a
/// fresh header for every client.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Set on the last packet of an access unit.
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    /// Size of the fixed header on the wire.
    pub const LEN: usize = 12;

    /// Serialize the 12-byte fixed header.
    pub fn write(&self) -> [u8; Self::LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);

        let mut header = [0u8; Self::LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse a fixed header from the start of `buf`.
    ///
    /// Returns `None` if the buffer is shorter than 12 bytes or the version
    /// field is not 2.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN || buf[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Build a complete RTP packet: this header followed by `payload`.
    pub fn packet(&self, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(Self::LEN + payload.len());
        packet.extend_from_slice(&self.write());
        packet.extend_from_slice(payload);
        packet
    }
}

/// Random SSRC per RFC 3550 §8.1, to minimize collisions between
/// independent sources.
pub fn random_ssrc() -> u32 {
    let ssrc = rand::random::<u32>();
    tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "SSRC chosen");
    ssrc
}

/// 90 kHz video timestamp for a presentation time in milliseconds.
///
/// Wraps modulo 2^32 as the RTP timestamp field does.
pub fn video_timestamp(pts_ms: u64) -> u32 {
    pts_ms.wrapping_mul(u64::from(VIDEO_CLOCK_RATE / 1000)) as u32
}

/// Audio timestamp at `sample_rate` Hz for a presentation time in milliseconds.
pub fn audio_timestamp(pts_ms: u64, sample_rate: u32) -> u32 {
    (pts_ms.wrapping_mul(u64::from(sample_rate)) / 1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader {
            marker: false,
            payload_type: VIDEO_PAYLOAD_TYPE,
            sequence: 0,
            timestamp: 0,
            ssrc: 0xAABBCCDD,
        }
    }

    #[test]
    fn version_is_2() {
        let buf = make_header().write();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[0] & 0x3f, 0, "no padding, extension or CSRCs");
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        assert_eq!(h.write()[1] & 0x80, 0);

        h.marker = true;
        assert_eq!(h.write()[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_type() {
        let buf = make_header().write();
        assert_eq!(buf[1] & 0x7f, 96);
    }

    #[test]
    fn fields_big_endian() {
        let h = RtpHeader {
            marker: true,
            payload_type: AUDIO_PAYLOAD_TYPE,
            sequence: 0x1234,
            timestamp: 0x01020304,
            ssrc: 0xAABBCCDD,
        };
        let buf = h.write();
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(RtpHeader::parse(&buf), Some(h));
    }

    #[test]
    fn parse_rejects_short_or_wrong_version() {
        assert!(RtpHeader::parse(&[0x80; 11]).is_none());
        let mut buf = make_header().write();
        buf[0] = 0x40;
        assert!(RtpHeader::parse(&buf).is_none());
    }

    #[test]
    fn packet_prepends_header() {
        let p = make_header().packet(&[0x65, 1, 2]);
        assert_eq!(p.len(), 15);
        assert_eq!(&p[12..], &[0x65, 1, 2]);
    }

    #[test]
    fn timestamps() {
        assert_eq!(video_timestamp(1000), 90_000);
        assert_eq!(video_timestamp(33), 2970);
        assert_eq!(audio_timestamp(1000, 44_100), 44_100);
        assert_eq!(audio_timestamp(20, 48_000), 960);
    }

    #[test]
    fn video_timestamp_wraps() {
        let ms = (u64::from(u32::MAX) / 90) + 1;
        assert!(u64::from(video_timestamp(ms)) < ms * 90);
    }
}
