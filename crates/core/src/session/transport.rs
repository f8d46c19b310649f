use crate::media::MediaKind;

/// Default interleaved channel pair for the video track.
pub const DEFAULT_VIDEO_CHANNELS: (u8, u8) = (0, 1);
/// Default interleaved channel pair for the audio track.
pub const DEFAULT_AUDIO_CHANNELS: (u8, u8) = (2, 3);

/// Client-side transport request parsed from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// TCP interleaved:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// UDP unicast:      Transport: RTP/AVP;unicast;client_port=8000-8001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    /// RTP/RTCP multiplexed on the RTSP connection with `$` framing
    /// (RFC 2326 §10.12).
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// RTP/RTCP as UDP datagrams to the client's receive ports.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
}

impl TransportHeader {
    /// Parse the `Transport` header value for the given track.
    ///
    /// A header naming TCP or carrying `interleaved=` selects interleaved
    /// mode; a missing or unreadable channel pair falls back to 0-1 for
    /// video and 2-3 for audio. Anything else is treated as UDP and must
    /// carry `client_port=RTP-RTCP`.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::media::MediaKind;
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001", MediaKind::Video);
    /// assert_eq!(
    ///     th,
    ///     Some(TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 })
    /// );
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast", MediaKind::Video).is_none());
    /// ```
    pub fn parse(header: &str, kind: MediaKind) -> Option<Self> {
        let params: Vec<&str> = header.split(';').map(str::trim).collect();

        let interleaved = params
            .iter()
            .find_map(|p| p.strip_prefix("interleaved="));
        let is_tcp = interleaved.is_some()
            || params
                .first()
                .is_some_and(|spec| spec.to_ascii_uppercase().ends_with("/TCP"));

        if is_tcp {
            let default = match kind {
                MediaKind::Video => DEFAULT_VIDEO_CHANNELS,
                MediaKind::Audio => DEFAULT_AUDIO_CHANNELS,
            };
            let (rtp_channel, rtcp_channel) = interleaved
                .and_then(|pair| parse_pair::<u8>(pair))
                .unwrap_or(default);
            return Some(TransportHeader::Interleaved {
                rtp_channel,
                rtcp_channel,
            });
        }

        let (client_rtp_port, client_rtcp_port) = params
            .iter()
            .find_map(|p| p.strip_prefix("client_port="))
            .and_then(|pair| parse_pair::<u16>(pair))?;

        Some(TransportHeader::Udp {
            client_rtp_port,
            client_rtcp_port,
        })
    }
}

/// Parse `a-b`. A lone `a` yields `(a, a + 1)`.
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    let mut parts = value.split('-');
    let first: T = parts.next()?.trim().parse().ok()?;
    let second: T = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => T::try_from(u32::from(first) + 1).ok()?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((first, second))
}

/// Negotiated delivery parameters for one track of a client session.
///
/// Created during SETUP from the client's [`TransportHeader`] and, in UDP
/// mode, the server's allocated port pair.
///
/// ```text
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
    Udp {
        /// Client's RTP receive port.
        client_rtp_port: u16,
        /// Client's RTCP receive port (typically `client_rtp_port + 1`).
        client_rtcp_port: u16,
        /// Server RTP port advertised to the client.
        server_rtp_port: u16,
        /// Server RTCP port advertised to the client.
        server_rtcp_port: u16,
    },
}

impl Delivery {
    /// Whether both deliveries are interleaved and share a channel number.
    pub fn shares_channel_with(&self, other: &Delivery) -> bool {
        match (self.channels(), other.channels()) {
            (Some(a), Some(b)) => [a.0, a.1].iter().any(|ch| *ch == b.0 || *ch == b.1),
            _ => false,
        }
    }

    fn channels(&self) -> Option<(u8, u8)> {
        match *self {
            Delivery::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => Some((rtp_channel, rtcp_channel)),
            Delivery::Udp { .. } => None,
        }
    }

    /// `Transport` header value echoed in the SETUP response.
    pub fn response_header(&self) -> String {
        match self {
            Delivery::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={}-{}", rtp_channel, rtcp_channel),
            Delivery::Udp {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
            } => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                client_rtp_port, client_rtcp_port, server_rtp_port, server_rtcp_port
            ),
        }
    }
}
