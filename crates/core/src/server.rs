use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::events::{NoopEvents, StreamEvents};
use crate::fanout::MediaFanout;
use crate::protocol::auth::{Authenticator, Credentials};
use crate::session::{DEFAULT_SESSION_TIMEOUT_SECS, PortAllocator};
use crate::stats::Bandwidth;
use crate::stream::{StreamDescriptor, StreamInstance, StreamRegistry, StreamStats};
use crate::transport::ConnectionWriter;
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTSP listen address. Port 0 picks a free port; see [`Server::local_addr`].
    pub bind_addr: String,
    /// When set, every request but OPTIONS must authenticate.
    pub credentials: Option<Credentials>,
    /// Realm offered in `WWW-Authenticate` challenges.
    pub realm: String,
    /// Idle timeout hint sent in the `Session` header.
    pub session_timeout_secs: u64,
    /// Minimum spacing of RTCP Sender Reports per stream.
    pub rtcp_interval: Duration,
    /// Upper bound on one write to a client's TCP connection.
    pub write_timeout: Duration,
    /// How long [`Server::stop`] waits for the accept thread.
    pub shutdown_timeout: Duration,
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
            credentials: None,
            realm: "rtsp-streamer".to_string(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            rtcp_interval: Duration::from_secs(3),
            write_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
        }
    }
}

/// State shared by the accept loop and every connection handler.
pub(crate) struct ServerContext {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) registry: StreamRegistry,
    pub(crate) events: Arc<dyn StreamEvents>,
    pub(crate) authenticator: Authenticator,
    pub(crate) ports: PortAllocator,
    pub(crate) bandwidth: Bandwidth,
    /// Open connections, so `stop` can unblock their readers.
    connections: Mutex<HashMap<SocketAddr, Arc<ConnectionWriter>>>,
}

impl ServerContext {
    pub(crate) fn new(
        config: Arc<ServerConfig>,
        registry: StreamRegistry,
        events: Arc<dyn StreamEvents>,
        bandwidth: Bandwidth,
    ) -> Self {
        let authenticator = Authenticator::new(config.credentials.clone(), &config.realm);
        Self {
            config,
            registry,
            events,
            authenticator,
            ports: PortAllocator::new(),
            bandwidth,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn track_connection(&self, peer: SocketAddr, writer: Arc<ConnectionWriter>) {
        self.connections.lock().insert(peer, writer);
    }

    pub(crate) fn untrack_connection(&self, peer: &SocketAddr) {
        self.connections.lock().remove(peer);
    }

    /// Shut down every open connection. Returns how many were open.
    fn close_connections(&self) -> usize {
        let connections: Vec<Arc<ConnectionWriter>> =
            self.connections.lock().values().cloned().collect();
        for writer in &connections {
            writer.shutdown();
        }
        connections.len()
    }
}

/// Multi-stream RTSP server.
///
/// Streams are registered up front; encoder threads then push access
/// units through [`push_video_frame`](Self::push_video_frame) and
/// [`push_audio_frame`](Self::push_audio_frame). Connection handling runs
/// in [`transport::tcp`](crate::transport::tcp), one thread per client.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: StreamRegistry,
    bandwidth: Bandwidth,
    context: Arc<ServerContext>,
    fanout: MediaFanout,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let registry = StreamRegistry::new();
        let bandwidth = Bandwidth::new();
        let events: Arc<dyn StreamEvents> = Arc::new(NoopEvents);
        Self {
            context: Arc::new(ServerContext::new(
                config.clone(),
                registry.clone(),
                events.clone(),
                bandwidth.clone(),
            )),
            fanout: MediaFanout::new(
                registry.clone(),
                events,
                bandwidth.clone(),
                config.rtcp_interval,
            ),
            config,
            registry,
            bandwidth,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Install the listener for client and parameter-set notifications.
    ///
    /// Must be called before [`start`](Self::start); the authentication
    /// nonce is regenerated.
    pub fn with_events(mut self, events: Arc<dyn StreamEvents>) -> Self {
        self.context = Arc::new(ServerContext::new(
            self.config.clone(),
            self.registry.clone(),
            events.clone(),
            self.bandwidth.clone(),
        ));
        self.fanout = MediaFanout::new(
            self.registry.clone(),
            events,
            self.bandwidth.clone(),
            self.config.rtcp_interval,
        );
        self
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    /// Register a stream under its descriptor's path.
    pub fn register(&self, descriptor: StreamDescriptor) -> Result<Arc<StreamInstance>> {
        self.registry.register(descriptor)
    }

    pub fn set_video_parameter_sets(&self, path: &str, sps: &[u8], pps: &[u8]) -> Result<()> {
        self.fanout.set_video_parameter_sets(path, sps, pps)
    }

    /// Drop the stored SPS/PPS for `path` after an encoder restart.
    pub fn clear_video_parameter_sets(&self, path: &str) -> Result<()> {
        self.fanout.clear_video_parameter_sets(path)
    }

    pub fn set_audio_config(&self, path: &str, config: &[u8]) -> Result<()> {
        self.fanout.set_audio_config(path, config)
    }

    /// Deliver an encoded video access unit. See [`MediaFanout::push_video_frame`].
    pub fn push_video_frame(
        &self,
        path: &str,
        data: &[u8],
        timestamp_ms: u64,
        is_codec_config: bool,
    ) -> Result<()> {
        self.fanout
            .push_video_frame(path, data, timestamp_ms, is_codec_config)
    }

    pub fn push_audio_frame(&self, path: &str, data: &[u8], timestamp_ms: u64) -> Result<()> {
        self.fanout.push_audio_frame(path, data, timestamp_ms)
    }

    /// Clients subscribed to `path`, or 0 for an unknown path.
    pub fn client_count(&self, path: &str) -> usize {
        self.registry.get(path).map_or(0, |s| s.client_count())
    }

    pub fn total_client_count(&self) -> usize {
        self.registry.total_client_count()
    }

    pub fn current_upload_bytes_per_second(&self) -> u64 {
        self.bandwidth.upload_bytes_per_second()
    }

    pub fn current_download_bytes_per_second(&self) -> u64 {
        self.bandwidth.download_bytes_per_second()
    }

    pub fn stream_stats(&self, path: &str) -> Option<StreamStats> {
        self.registry.get(path).map(|s| s.stats())
    }

    /// Consume a pending key frame request for `path`, set when a client
    /// starts playing.
    pub fn take_key_frame_request(&self, path: &str) -> bool {
        self.registry
            .get(path)
            .is_some_and(|s| s.take_key_frame_request())
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let context = self.context.clone();

        tracing::info!(
            addr = %local_addr,
            streams = self.registry.streams().len(),
            auth = self.context.authenticator.is_enabled(),
            "RTSP server listening"
        );

        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, context, running);
        }));
        self.local_addr = Some(local_addr);

        Ok(())
    }

    /// Close every client connection, then wait (bounded) for the accept
    /// thread to exit.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");

        for stream in self.registry.streams() {
            for client in stream.clients() {
                client.close();
            }
        }
        let closed = self.context.close_connections();
        tracing::debug!(closed, "connections closed");

        if let Some(handle) = self.accept_thread.take() {
            let deadline = Instant::now() + self.config.shutdown_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                tracing::warn!("accept thread did not exit in time, detaching");
            } else if handle.join().is_err() {
                tracing::error!("accept thread panicked");
            }
        }
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
