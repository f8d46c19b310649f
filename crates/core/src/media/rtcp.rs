use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// RTCP packet type of a Sender Report (RFC 3550 §6.4.1).
pub const PACKET_TYPE_SR: u8 = 200;

/// Size of a Sender Report without report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// RTCP Sender Report with no reception report blocks (RFC 3550 §6.4.1).
///
/// ```text
/// |V=2|P|  RC=0   |   PT=200      |          length=6             |
/// |                         SSRC of sender                        |
/// |              NTP timestamp, most significant word             |
/// |             NTP timestamp, least significant word             |
/// |                         RTP timestamp                         |
/// |                     sender's packet count                     |
/// |                      sender's octet count                     |
/// ```
///
/// Packet and octet counts are written as zero. Receivers use the report
/// to map RTP time to wall-clock time, not for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 64-bit NTP timestamp (seconds since 1900 in the high word).
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
}

impl SenderReport {
    /// Report stamped with the current wall-clock time.
    pub fn now(ssrc: u32, rtp_timestamp: u32) -> Self {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            ssrc,
            ntp_timestamp: ntp_from_unix(since_unix),
            rtp_timestamp,
        }
    }

    pub fn write(&self) -> [u8; SENDER_REPORT_LEN] {
        let length_words = (SENDER_REPORT_LEN / 4 - 1) as u16;

        let mut buf = [0u8; SENDER_REPORT_LEN];
        buf[0] = 2 << 6;
        buf[1] = PACKET_TYPE_SR;
        buf[2..4].copy_from_slice(&length_words.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..16].copy_from_slice(&self.ntp_timestamp.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        // 20..28: packet and octet counts stay zero.
        buf
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < SENDER_REPORT_LEN || buf[0] >> 6 != 2 || buf[1] != PACKET_TYPE_SR {
            return None;
        }
        let mut ntp = [0u8; 8];
        ntp.copy_from_slice(&buf[8..16]);
        Some(Self {
            ssrc: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ntp_timestamp: u64::from_be_bytes(ntp),
            rtp_timestamp: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }
}

/// Convert a duration since the Unix epoch into a 64-bit NTP timestamp.
pub fn ntp_from_unix(since_unix: Duration) -> u64 {
    let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET_SECS;
    let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;
    (seconds << 32) | fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let sr = SenderReport {
            ssrc: 0x11223344,
            ntp_timestamp: 0x0102030405060708,
            rtp_timestamp: 0xA0B0C0D0,
        };
        let buf = sr.write();

        assert_eq!(buf.len(), 28);
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 200);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 6);
        assert_eq!(&buf[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&buf[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&buf[16..20], &[0xA0, 0xB0, 0xC0, 0xD0]);
        assert!(buf[20..].iter().all(|&b| b == 0));
        assert_eq!(SenderReport::parse(&buf), Some(sr));
    }

    #[test]
    fn ntp_epoch_offset() {
        let ntp = ntp_from_unix(Duration::from_millis(1500));
        assert_eq!(ntp >> 32, NTP_UNIX_OFFSET_SECS + 1);
        assert_eq!(ntp & 0xFFFF_FFFF, 1 << 31);
    }

    #[test]
    fn now_is_after_1970() {
        let sr = SenderReport::now(1, 0);
        assert!(sr.ntp_timestamp >> 32 > NTP_UNIX_OFFSET_SECS);
    }

    #[test]
    fn parse_rejects_other_packet_types() {
        let mut buf = SenderReport::now(1, 2).write();
        buf[1] = 201;
        assert!(SenderReport::parse(&buf).is_none());
    }
}
