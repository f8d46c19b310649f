use std::net::SocketAddr;

use crate::error::RtspError;
use crate::media::MediaKind;
use crate::session::{ClientSession, Delivery};

use super::Channel;

/// Deliver one RTP or RTCP packet to a client on the given track.
///
/// TCP-interleaved clients get a `$`-framed write on the connection
/// (serialized with signaling by the [`ConnectionWriter`](super::ConnectionWriter)
/// lock). UDP clients get a datagram to their negotiated RTP or RTCP port
/// from a per-client socket created on first use.
///
/// Errors are logged and reported as `0` bytes sent. A failing client must
/// not abort delivery to the others. An interleaved write failure breaks
/// the connection (see [`ConnectionWriter`](super::ConnectionWriter)), and
/// the client is skipped from then on.
pub fn send(client: &ClientSession, kind: MediaKind, channel: Channel, packet: &[u8]) -> usize {
    let Some(delivery) = client.delivery(kind) else {
        tracing::trace!(client = %client.id, ?kind, "track not set up, packet skipped");
        return 0;
    };

    let result = match delivery {
        Delivery::Interleaved {
            rtp_channel,
            rtcp_channel,
        } => {
            if client.writer().is_broken() {
                return 0;
            }
            let ch = match channel {
                Channel::Rtp => rtp_channel,
                Channel::Rtcp => rtcp_channel,
            };
            client
                .writer()
                .write_interleaved(ch, packet)
                .map_err(RtspError::from)
        }
        Delivery::Udp {
            client_rtp_port,
            client_rtcp_port,
            ..
        } => {
            let port = match channel {
                Channel::Rtp => client_rtp_port,
                Channel::Rtcp => client_rtcp_port,
            };
            let dest = SocketAddr::new(client.peer_addr.ip(), port);
            client.with_udp(|udp| udp.send_to(packet, dest))
        }
    };

    match result {
        Ok(sent) => sent,
        Err(e) => {
            tracing::warn!(client = %client.id, ?kind, ?channel, error = %e, "send failed");
            0
        }
    }
}
