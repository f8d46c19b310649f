use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Magic byte opening an interleaved binary frame.
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Build the 4-byte interleaved frame header (RFC 2326 §10.12).
///
/// ```text
/// '$' | channel (1 byte) | length (2 bytes, big-endian)
/// ```
pub fn frame_header(channel: u8, len: usize) -> io::Result<[u8; 4]> {
    let len = u16::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interleaved payload of {len} bytes exceeds 65535"),
        )
    })?;
    let len = len.to_be_bytes();
    Ok([INTERLEAVED_MAGIC, channel, len[0], len[1]])
}

/// Write side of an RTSP connection.
///
/// Signaling responses (connection thread) and interleaved media (producer
/// threads) share the same socket. Every write takes the lock, so a frame
/// header and its payload are never split by another writer.
///
/// A failed or timed-out write may leave part of a frame on the wire, after
/// which the client's framing cannot be recovered. The first failure marks
/// the writer broken and shuts the socket down; later writes fail at once.
pub struct ConnectionWriter {
    inner: Mutex<Box<dyn Write + Send>>,
    socket: Option<TcpStream>,
    broken: AtomicBool,
}

impl ConnectionWriter {
    /// Wrap a connected socket. A clone of the handle is kept so
    /// [`shutdown`](Self::shutdown) works while another thread writes.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let socket = stream.try_clone()?;
        Ok(Self {
            inner: Mutex::new(Box::new(stream)),
            socket: Some(socket),
            broken: AtomicBool::new(false),
        })
    }

    /// Wrap an arbitrary writer (no socket to shut down).
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(Box::new(writer)),
            socket: None,
            broken: AtomicBool::new(false),
        }
    }

    /// Whether an earlier write failed. A broken writer never writes again.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Write a complete RTSP message and flush.
    pub fn write_message(&self, bytes: &[u8]) -> io::Result<()> {
        self.write_parts(&[bytes]).map(|_| ())
    }

    /// Write one `$`-framed packet on `channel` and flush.
    ///
    /// Returns the number of bytes put on the wire, header included.
    pub fn write_interleaved(&self, channel: u8, payload: &[u8]) -> io::Result<usize> {
        let header = frame_header(channel, payload.len())?;
        self.write_parts(&[header.as_slice(), payload])
    }

    fn write_parts(&self, parts: &[&[u8]]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if self.is_broken() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed after a failed write",
            ));
        }

        let result = parts
            .iter()
            .try_for_each(|part| inner.write_all(part))
            .and_then(|()| inner.flush());
        match result {
            Ok(()) => Ok(parts.iter().map(|p| p.len()).sum()),
            Err(e) => {
                self.broken.store(true, Ordering::SeqCst);
                drop(inner);
                tracing::warn!(error = %e, "write failed, closing connection");
                self.shutdown();
                Err(e)
            }
        }
    }

    /// Shut down both directions of the socket, unblocking its reader.
    pub fn shutdown(&self) {
        if let Some(socket) = &self.socket
            && let Err(e) = socket.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

/// Writer that appends to a shared buffer, for inspecting output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(pub std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
