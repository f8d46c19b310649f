use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::RtspError;
use crate::protocol::MethodHandler;
use crate::protocol::RtspRequest;
use crate::server::ServerContext;
use crate::transport::ConnectionWriter;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let c = context.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: Arc<ConnectionWriter>,
    handler: MethodHandler,
    context: Arc<ServerContext>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(stream: TcpStream, context: Arc<ServerContext>, running: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        if let Err(e) = stream.set_write_timeout(Some(context.config.write_timeout)) {
            tracing::warn!(%peer_addr, error = %e, "failed to set write timeout");
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        let writer = match ConnectionWriter::new(stream) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "failed to clone connection");
                return;
            }
        };

        context.track_connection(peer_addr, writer.clone());

        let handler = MethodHandler::new(context.clone(), peer_addr, writer.clone());

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer,
            handler,
            context,
            peer_addr,
        };

        let reason = conn.run(&running);
        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let (request, consumed) = match RtspRequest::read_from(&mut self.reader) {
                Ok(Some(read)) => read,
                Ok(None) => return "connection closed by client",
                Err(RtspError::Parse { kind }) => {
                    tracing::warn!(peer = %self.peer_addr, error = %kind, "malformed request");
                    return "malformed request";
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "read failed");
                    return "read error";
                }
            };
            self.context.bandwidth.record_download(consumed);

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                uri = %request.uri,
                version = %request.version,
                "request"
            );

            let response = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            let bytes = response.serialize();
            if let Err(e) = self.writer.write_message(bytes.as_bytes()) {
                tracing::debug!(peer = %self.peer_addr, error = %e, "write failed");
                return "write error";
            }
            self.context.bandwidth.record_upload(bytes.len());
        }

        "server shutting down"
    }

}

/// Deregisters the client and forgets the connection, also when the
/// request loop unwinds.
impl Drop for Connection {
    fn drop(&mut self) {
        self.handler.cleanup();
        self.writer.shutdown();
        self.context.untrack_connection(&self.peer_addr);
    }
}
