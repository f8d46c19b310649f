use std::net::SocketAddr;
use std::sync::Arc;

use crate::media::MediaKind;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerContext;
use crate::session::{ClientSession, Delivery, SessionState, TransportHeader};
use crate::stream::{StreamInstance, track_from_uri};
use crate::transport::ConnectionWriter;

/// Methods advertised in the OPTIONS `Public` header.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's [`ClientSession`] once the first SETUP resolved a
/// stream, so it can deregister the client when the connection drops.
pub struct MethodHandler {
    context: Arc<ServerContext>,
    client_addr: SocketAddr,
    writer: Arc<ConnectionWriter>,
    client: Option<Arc<ClientSession>>,
    stream: Option<Arc<StreamInstance>>,
}

impl MethodHandler {
    pub(crate) fn new(
        context: Arc<ServerContext>,
        client_addr: SocketAddr,
        writer: Arc<ConnectionWriter>,
    ) -> Self {
        MethodHandler {
            context,
            client_addr,
            writer,
            client: None,
            stream: None,
        }
    }

    /// The session created by this connection's first SETUP, if any.
    pub fn client(&self) -> Option<&Arc<ClientSession>> {
        self.client.as_ref()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        if request.method != "OPTIONS" && !self.authorized(request) {
            return self.challenge().with_cseq(cseq);
        }

        let response = match request.method.as_str() {
            "OPTIONS" => self.handle_options(),
            "DESCRIBE" => self.handle_describe(&request.uri),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "PAUSE" => self.handle_pause(request),
            "TEARDOWN" => self.handle_teardown(request),
            "GET_PARAMETER" => self.handle_get_parameter(request),
            _ => {
                tracing::warn!(peer = %self.client_addr, method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented()
            }
        };

        response.with_cseq(cseq)
    }

    /// Deregister this connection's client from its stream and close it.
    ///
    /// Fires `on_client_disconnected` at most once per client, however many
    /// times it is called.
    pub fn cleanup(&mut self) {
        let (Some(client), Some(stream)) = (self.client.take(), self.stream.take()) else {
            return;
        };

        if let Some(remaining) = stream.remove_client(&client.id) {
            tracing::info!(
                peer = %self.client_addr,
                path = %stream.path(),
                session_id = %client.session_id,
                remaining,
                "client removed from stream"
            );
            self.context
                .events
                .on_client_disconnected(stream.path(), remaining);
        }
        client.close();
    }

    fn authorized(&self, request: &RtspRequest) -> bool {
        let ok = self
            .context
            .authenticator
            .authorize(&request.method, request.get_header("Authorization"));
        if !ok {
            tracing::warn!(peer = %self.client_addr, method = %request.method, "authentication failed");
        }
        ok
    }

    fn challenge(&self) -> RtspResponse {
        let [digest, basic] = self.context.authenticator.challenges();
        RtspResponse::unauthorized()
            .add_header("WWW-Authenticate", &digest)
            .add_header("WWW-Authenticate", &basic)
    }

    fn handle_options(&self) -> RtspResponse {
        tracing::debug!(peer = %self.client_addr, "OPTIONS");
        RtspResponse::ok().add_header("Public", PUBLIC_METHODS)
    }

    /// Host for the SDP `o=`/`c=` lines: configured public host, else the
    /// host of the request URI, else the client's own address.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.context.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .map(|authority| authority.rsplit('@').next().unwrap_or(authority))
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, uri: &str) -> RtspResponse {
        tracing::debug!(peer = %self.client_addr, uri, "DESCRIBE");

        let Some(stream) = self.context.registry.resolve_from_uri(uri) else {
            tracing::warn!(peer = %self.client_addr, uri, "DESCRIBE for unknown stream");
            return RtspResponse::not_found();
        };

        let host = self.host_from_uri_or_client(uri);
        let sdp = sdp::generate_sdp(&stream, &host, &self.context.config);

        // Trailing slash so relative `a=control:trackN` resolves under the stream.
        let content_base = format!("{}/", uri.trim_end_matches('/'));

        RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base)
            .with_body(sdp)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(peer = %self.client_addr, "SETUP missing Transport header");
            return RtspResponse::bad_request();
        };

        if let Some(client) = &self.client
            && request
                .session_id()
                .is_some_and(|id| id != client.session_id)
        {
            tracing::warn!(peer = %self.client_addr, "SETUP with foreign session id");
            return RtspResponse::session_not_found();
        }

        let kind = track_from_uri(&request.uri);
        let Some(requested) = TransportHeader::parse(transport_header, kind) else {
            tracing::warn!(peer = %self.client_addr, transport = transport_header, "SETUP invalid Transport header");
            return RtspResponse::unsupported_transport();
        };

        let delivery = match requested {
            TransportHeader::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => Delivery::Interleaved {
                rtp_channel,
                rtcp_channel,
            },
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let (server_rtp_port, server_rtcp_port) = match self.context.ports.allocate() {
                    Ok(ports) => ports,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to allocate server ports");
                        return RtspResponse::internal_error();
                    }
                };
                Delivery::Udp {
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port,
                    server_rtcp_port,
                }
            }
        };

        if let Some(client) = &self.client
            && let Some(other) = client.delivery(kind.other())
            && delivery.shares_channel_with(&other)
        {
            tracing::warn!(
                peer = %self.client_addr,
                transport = transport_header,
                "SETUP interleaved channels already in use"
            );
            return RtspResponse::unsupported_transport();
        }

        let client = match &self.client {
            Some(client) => client.clone(),
            None => match self.subscribe(&request.uri) {
                Some(client) => client,
                None => {
                    tracing::warn!(peer = %self.client_addr, uri = %request.uri, "SETUP for unknown stream");
                    return RtspResponse::not_found();
                }
            },
        };

        client.set_delivery(kind, delivery);

        tracing::info!(
            peer = %self.client_addr,
            session_id = %client.session_id,
            path = %client.path,
            track = kind.control(),
            transport = %delivery.response_header(),
            "track set up"
        );

        RtspResponse::ok()
            .add_header("Transport", &delivery.response_header())
            .add_header("Session", &client.session_header_value())
    }

    /// Resolve the stream and register this connection's client in it.
    fn subscribe(&mut self, uri: &str) -> Option<Arc<ClientSession>> {
        let stream = self.context.registry.resolve_from_uri(uri)?;

        let client = Arc::new(ClientSession::new(
            self.client_addr,
            stream.path(),
            self.writer.clone(),
            self.context.config.session_timeout_secs,
            stream.start_sequences(),
        ));
        let total = stream.add_client(client.clone());

        tracing::info!(
            peer = %self.client_addr,
            session_id = %client.session_id,
            path = %stream.path(),
            total,
            "session created via SETUP"
        );
        self.context.events.on_client_connected(stream.path(), total);

        self.client = Some(client.clone());
        self.stream = Some(stream);
        Some(client)
    }

    /// The connection's session, if the request names it.
    fn session_for(&self, request: &RtspRequest) -> Result<Arc<ClientSession>, RtspResponse> {
        let Some(client) = &self.client else {
            return Err(RtspResponse::method_not_valid());
        };
        match request.session_id() {
            Some(id) if id == client.session_id => Ok(client.clone()),
            other => {
                tracing::warn!(peer = %self.client_addr, session = ?other, method = %request.method, "session mismatch");
                Err(RtspResponse::session_not_found())
            }
        }
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let client = match self.session_for(request) {
            Ok(client) => client,
            Err(response) => return response,
        };

        client.set_state(SessionState::Playing);
        tracing::info!(peer = %self.client_addr, session_id = %client.session_id, path = %client.path, "session started playing");

        if let Some(stream) = &self.stream {
            stream.request_key_frame();
        }
        self.context.events.on_client_started_playing(&client.path);

        let base = request.uri.trim_end_matches('/');
        let rtp_info: Vec<String> = [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter(|kind| client.delivery(*kind).is_some())
            .map(|kind| {
                format!(
                    "url={}/{};seq={}",
                    base,
                    kind.control(),
                    client.peek_sequence(kind)
                )
            })
            .collect();

        let mut resp = RtspResponse::ok()
            .add_header("Session", &client.session_header_value())
            .add_header("Range", "npt=0.000-");
        if !rtp_info.is_empty() {
            resp = resp.add_header("RTP-Info", &rtp_info.join(","));
        }
        resp
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> RtspResponse {
        let client = match self.session_for(request) {
            Ok(client) => client,
            Err(response) => return response,
        };

        client.set_state(SessionState::Paused);
        tracing::info!(peer = %self.client_addr, session_id = %client.session_id, "session paused");
        RtspResponse::ok().add_header("Session", &client.session_header_value())
    }

    /// Stops delivery only; the client stays registered until the
    /// connection closes.
    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        let client = match self.session_for(request) {
            Ok(client) => client,
            Err(_) => return RtspResponse::session_not_found(),
        };

        client.set_state(SessionState::Ready);
        tracing::info!(peer = %self.client_addr, session_id = %client.session_id, "session torn down");
        RtspResponse::ok()
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(peer = %self.client_addr, "GET_PARAMETER keepalive");

        match (&self.client, request.session_id()) {
            (_, None) => RtspResponse::ok(),
            (Some(client), Some(id)) if id == client.session_id => {
                RtspResponse::ok().add_header("Session", &client.session_header_value())
            }
            _ => RtspResponse::session_not_found(),
        }
    }
}
