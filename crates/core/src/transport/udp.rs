use std::net::{SocketAddr, UdpSocket};

use crate::error::Result;

/// Outbound UDP socket for one client's RTP/RTCP delivery.
///
/// Binds an ephemeral port of the same address family as the client.
/// This layer is address-only; it does not know about sessions or
/// streams; the sender resolves the destination port.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral socket suitable for sending to `peer`.
    pub fn bind_for(peer: SocketAddr) -> Result<Self> {
        let bind_addr = if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(Self { socket })
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();

        let udp = UdpTransport::bind_for(dest).unwrap();
        assert_eq!(udp.send_to(&[1, 2, 3], dest).unwrap(), 3);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }
}
