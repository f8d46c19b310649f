//! Media fan-out: from one produced access unit to RTP on every playing client.
//!
//! Entry points are called from the encoder's producer threads, one per
//! media type. Each call works on a snapshot of the stream's playing
//! clients, so signaling threads can add and remove clients concurrently.
//!
//! ```text
//! push_video_frame
//!   ├─ codec config?  → store SPS/PPS, notify, done
//!   ├─ no playing clients → done
//!   ├─ key frame?     → SPS, PPS packets first (if known)
//!   ├─ NAL units → FU-A → RTP per client (own sequence space)
//!   └─ RTCP SR every `rtcp_interval`
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError};
use crate::events::StreamEvents;
use crate::media::rtcp::SenderReport;
use crate::media::rtp::{self, RtpHeader};
use crate::media::{MediaKind, RtpPayload, aac, h264};
use crate::session::ClientSession;
use crate::stats::Bandwidth;
use crate::stream::{StreamInstance, StreamRegistry};
use crate::transport::Channel;
use crate::transport::sender;

/// Producer-side entry points into the stream registry.
#[derive(Clone)]
pub struct MediaFanout {
    registry: StreamRegistry,
    events: Arc<dyn StreamEvents>,
    bandwidth: Bandwidth,
    rtcp_interval: Duration,
}

impl MediaFanout {
    pub fn new(
        registry: StreamRegistry,
        events: Arc<dyn StreamEvents>,
        bandwidth: Bandwidth,
        rtcp_interval: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            bandwidth,
            rtcp_interval,
        }
    }

    fn stream(&self, path: &str) -> Result<Arc<StreamInstance>> {
        self.registry
            .get(path)
            .ok_or_else(|| RtspError::StreamNotFound(path.to_string()))
    }

    /// Store new video parameter sets. Start codes, if present, are stripped.
    pub fn set_video_parameter_sets(&self, path: &str, sps: &[u8], pps: &[u8]) -> Result<()> {
        let stream = self.stream(path)?;
        stream.set_video_parameter_sets(h264::strip_start_code(sps), h264::strip_start_code(pps));
        self.events.on_parameter_sets_changed(stream.path());
        Ok(())
    }

    /// Forget the video parameter sets, e.g. when the encoder restarts.
    /// SDP and key frames go without them until new ones are stored.
    pub fn clear_video_parameter_sets(&self, path: &str) -> Result<()> {
        let stream = self.stream(path)?;
        stream.clear_video_parameter_sets();
        self.events.on_parameter_sets_changed(stream.path());
        Ok(())
    }

    pub fn set_audio_config(&self, path: &str, config: &[u8]) -> Result<()> {
        let stream = self.stream(path)?;
        stream.set_audio_config(config);
        self.events.on_parameter_sets_changed(stream.path());
        Ok(())
    }

    /// Deliver one encoded video access unit (Annex-B) to the playing clients.
    ///
    /// A codec-config buffer only updates the stream's parameter sets.
    pub fn push_video_frame(
        &self,
        path: &str,
        data: &[u8],
        timestamp_ms: u64,
        is_codec_config: bool,
    ) -> Result<()> {
        let stream = self.stream(path)?;

        if is_codec_config {
            match h264::find_parameter_sets(data) {
                (Some(sps), Some(pps)) => {
                    stream.set_video_parameter_sets(sps, pps);
                    self.events.on_parameter_sets_changed(stream.path());
                }
                _ => tracing::warn!(path, len = data.len(), "codec config without SPS and PPS"),
            }
            return Ok(());
        }

        let clients = stream.playing_clients();
        if clients.is_empty() {
            return Ok(());
        }

        let nal_units = h264::extract_nal_units(data);
        if nal_units.is_empty() {
            return Ok(());
        }

        let mut payloads: Vec<RtpPayload> = Vec::new();
        if h264::is_key_frame(&nal_units) {
            stream.take_key_frame_request();
            if let Some(sets) = stream.video_parameter_sets() {
                payloads = h264::packetize_access_unit(&[sets.sps.as_slice(), sets.pps.as_slice()]);
                for payload in &mut payloads {
                    payload.marker = false;
                }
            }
        }
        payloads.extend(h264::packetize_access_unit(&nal_units));

        let timestamp = rtp::video_timestamp(timestamp_ms);
        let sent = self.deliver(&stream, &clients, MediaKind::Video, &payloads, timestamp);
        stream.record_frame(MediaKind::Video, sent);

        tracing::trace!(
            path,
            clients = clients.len(),
            packets = payloads.len(),
            bytes = sent,
            "video frame sent"
        );

        self.send_sender_report(&stream, &clients, MediaKind::Video, timestamp);
        Ok(())
    }

    /// Deliver one AAC access unit to the playing clients.
    ///
    /// Discarded when the stream was registered without audio.
    pub fn push_audio_frame(&self, path: &str, data: &[u8], timestamp_ms: u64) -> Result<()> {
        let stream = self.stream(path)?;
        let descriptor = stream.descriptor();
        if !descriptor.audio_enabled {
            tracing::trace!(path, "audio frame for video-only stream dropped");
            return Ok(());
        }

        let clients = stream.playing_clients();
        if clients.is_empty() {
            return Ok(());
        }

        let payload = RtpPayload {
            data: aac::frame_access_unit(data)?,
            marker: true,
        };
        let timestamp = rtp::audio_timestamp(timestamp_ms, descriptor.audio_sample_rate);
        let sent = self.deliver(
            &stream,
            &clients,
            MediaKind::Audio,
            std::slice::from_ref(&payload),
            timestamp,
        );
        stream.record_frame(MediaKind::Audio, sent);

        self.send_sender_report(&stream, &clients, MediaKind::Audio, timestamp);
        Ok(())
    }

    /// Stamp each payload with a per-client header and send it. Clients
    /// that did not set up this track are skipped and keep their sequence.
    ///
    /// A client whose connection breaks mid-frame is dropped for the rest
    /// of the access unit, so it costs at most one write timeout.
    fn deliver(
        &self,
        stream: &StreamInstance,
        clients: &[Arc<ClientSession>],
        kind: MediaKind,
        payloads: &[RtpPayload],
        timestamp: u32,
    ) -> u64 {
        let ssrc = stream.ssrc(kind);
        let mut sent = 0usize;

        for client in clients.iter().filter(|c| c.delivery(kind).is_some()) {
            for payload in payloads {
                if client.writer().is_broken() {
                    tracing::debug!(client = %client.id, ?kind, "connection broken, skipping client");
                    break;
                }
                let header = RtpHeader {
                    marker: payload.marker,
                    payload_type: kind.payload_type(),
                    sequence: client.next_sequence(kind),
                    timestamp,
                    ssrc,
                };
                sent += sender::send(client, kind, Channel::Rtp, &header.packet(&payload.data));
            }
        }

        stream.advance_sequence(kind, payloads.len());
        self.bandwidth.record_upload(sent);
        sent as u64
    }

    /// Sender Report on the `kind` track's RTCP channel, at most once per
    /// `rtcp_interval`. Clients without that track are skipped.
    fn send_sender_report(
        &self,
        stream: &StreamInstance,
        clients: &[Arc<ClientSession>],
        kind: MediaKind,
        rtp_timestamp: u32,
    ) {
        if !stream.take_rtcp_slot(kind, Instant::now(), self.rtcp_interval) {
            return;
        }

        let report = SenderReport::now(stream.ssrc(kind), rtp_timestamp).write();
        let mut sent = 0usize;
        for client in clients.iter().filter(|c| c.delivery(kind).is_some()) {
            sent += sender::send(client, kind, Channel::Rtcp, &report);
        }
        self.bandwidth.record_upload(sent);
        tracing::trace!(path = %stream.path(), ?kind, clients = clients.len(), "RTCP sender report sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEvents;
    use crate::media::rtcp::PACKET_TYPE_SR;
    use crate::session::{Delivery, SessionState};
    use crate::stream::StreamDescriptor;
    use crate::transport::ConnectionWriter;
    use crate::transport::interleaved::SharedBuf;
    use parking_lot::Mutex;

    struct Frame {
        channel: u8,
        data: Vec<u8>,
    }

    fn frames(buf: &SharedBuf) -> Vec<Frame> {
        let bytes = buf.0.lock().clone();
        let mut out = Vec::new();
        let mut rest = bytes.as_slice();
        while rest.len() >= 4 {
            assert_eq!(rest[0], b'$');
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            out.push(Frame {
                channel: rest[1],
                data: rest[4..4 + len].to_vec(),
            });
            rest = &rest[4 + len..];
        }
        assert!(rest.is_empty());
        out
    }

    fn setup(descriptor: StreamDescriptor) -> (MediaFanout, Arc<StreamInstance>) {
        let registry = StreamRegistry::new();
        let stream = registry.register(descriptor).unwrap();
        let fanout = MediaFanout::new(
            registry,
            Arc::new(NoopEvents),
            Bandwidth::new(),
            Duration::from_secs(3),
        );
        (fanout, stream)
    }

    fn playing_client(stream: &StreamInstance, port: u16, with_audio: bool) -> SharedBuf {
        let buf = SharedBuf::default();
        let client = Arc::new(ClientSession::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            stream.path(),
            Arc::new(ConnectionWriter::from_writer(buf.clone())),
            60,
            stream.start_sequences(),
        ));
        client.set_delivery(
            MediaKind::Video,
            Delivery::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1,
            },
        );
        if with_audio {
            client.set_delivery(
                MediaKind::Audio,
                Delivery::Interleaved {
                    rtp_channel: 2,
                    rtcp_channel: 3,
                },
            );
        }
        client.set_state(SessionState::Playing);
        stream.add_client(client);
        buf
    }

    fn idr(len: usize) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1, 0x65];
        data.resize(4 + len, 0xAB);
        data
    }

    #[test]
    fn key_frame_without_parameter_sets() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1280, 720, 0, 30));
        let buf = playing_client(&stream, 1000, false);

        fanout.push_video_frame("live", &idr(50), 1000, false).unwrap();

        let rtp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 0).collect();
        assert_eq!(rtp.len(), 1);
        let header = RtpHeader::parse(&rtp[0].data).unwrap();
        assert!(header.marker);
        assert_eq!(header.sequence, 0);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.timestamp, 90_000);
        assert_eq!(header.ssrc, stream.ssrc(MediaKind::Video));
        assert_eq!(rtp[0].data.len(), RtpHeader::LEN + 50);
    }

    #[test]
    fn key_frame_prepends_parameter_sets() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1280, 720, 0, 30));
        fanout
            .set_video_parameter_sets("live", &[0, 0, 0, 1, 0x67, 0x42], &[0x68, 0xce])
            .unwrap();
        let buf = playing_client(&stream, 1000, false);

        fanout.push_video_frame("live", &idr(50), 0, false).unwrap();

        let rtp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 0).collect();
        assert_eq!(rtp.len(), 3);
        assert_eq!(&rtp[0].data[RtpHeader::LEN..], &[0x67, 0x42]);
        assert_eq!(&rtp[1].data[RtpHeader::LEN..], &[0x68, 0xce]);
        let seqs: Vec<u16> = rtp
            .iter()
            .map(|f| RtpHeader::parse(&f.data).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        let markers: Vec<bool> = rtp
            .iter()
            .map(|f| RtpHeader::parse(&f.data).unwrap().marker)
            .collect();
        assert_eq!(markers, vec![false, false, true]);
    }

    #[test]
    fn cleared_parameter_sets_not_prepended() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        fanout.set_video_parameter_sets("live", &[0x67], &[0x68]).unwrap();
        fanout.clear_video_parameter_sets("live").unwrap();
        assert!(stream.video_parameter_sets().is_none());
        let buf = playing_client(&stream, 1000, false);

        fanout.push_video_frame("live", &idr(10), 0, false).unwrap();
        let rtp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 0).collect();
        assert_eq!(rtp.len(), 1);
        assert_eq!(rtp[0].data[RtpHeader::LEN], 0x65);

        assert!(matches!(
            fanout.clear_video_parameter_sets("nope"),
            Err(RtspError::StreamNotFound(_))
        ));
    }

    #[test]
    fn non_key_frame_skips_parameter_sets() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        fanout.set_video_parameter_sets("live", &[0x67], &[0x68]).unwrap();
        let buf = playing_client(&stream, 1000, false);

        fanout
            .push_video_frame("live", &[0, 0, 1, 0x41, 1, 2, 3], 0, false)
            .unwrap();
        let rtp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 0).collect();
        assert_eq!(rtp.len(), 1);
        assert_eq!(rtp[0].data[RtpHeader::LEN], 0x41);
    }

    #[test]
    fn large_nal_fragmented_with_single_marker() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let buf = playing_client(&stream, 1000, false);

        fanout.push_video_frame("live", &idr(3000), 0, false).unwrap();
        let rtp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 0).collect();
        assert_eq!(rtp.len(), 3);
        let markers: Vec<bool> = rtp
            .iter()
            .map(|f| RtpHeader::parse(&f.data).unwrap().marker)
            .collect();
        assert_eq!(markers, vec![false, false, true]);
        assert!(rtp.iter().all(|f| f.data[RtpHeader::LEN] & 0x1f == 28));
    }

    #[test]
    fn codec_config_sets_parameter_sets_only() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let buf = playing_client(&stream, 1000, false);

        let config = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce];
        fanout.push_video_frame("live", &config, 0, true).unwrap();

        assert!(frames(&buf).is_empty());
        let sets = stream.video_parameter_sets().unwrap();
        assert_eq!(sets.sps, vec![0x67, 0x42]);
        assert_eq!(sets.pps, vec![0x68, 0xce]);
    }

    #[test]
    fn paused_and_idle_clients_receive_nothing() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        fanout.push_video_frame("live", &idr(10), 0, false).unwrap();
        assert_eq!(stream.stats().video_frames, 0);

        let buf = playing_client(&stream, 1000, false);
        for client in stream.clients() {
            client.set_state(SessionState::Paused);
        }
        fanout.push_video_frame("live", &idr(10), 0, false).unwrap();
        assert!(frames(&buf).is_empty());
    }

    #[test]
    fn sequences_continue_across_frames() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let first = playing_client(&stream, 1000, false);
        for ts in 0..3 {
            fanout
                .push_video_frame("live", &[0, 0, 1, 0x41, 9], ts * 33, false)
                .unwrap();
        }
        // A late joiner starts at the stream's counter.
        let late = playing_client(&stream, 1001, false);
        fanout.push_video_frame("live", &[0, 0, 1, 0x41, 9], 100, false).unwrap();

        let seq = |buf: &SharedBuf| -> Vec<u16> {
            frames(buf)
                .into_iter()
                .filter(|f| f.channel == 0)
                .map(|f| RtpHeader::parse(&f.data).unwrap().sequence)
                .collect()
        };
        assert_eq!(seq(&first), vec![0, 1, 2, 3]);
        assert_eq!(seq(&late), vec![3]);
    }

    #[test]
    fn sender_report_paced_per_stream() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let buf = playing_client(&stream, 1000, false);
        fanout.push_video_frame("live", &idr(10), 0, false).unwrap();
        fanout.push_video_frame("live", &idr(10), 33, false).unwrap();

        let rtcp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 1).collect();
        assert_eq!(rtcp.len(), 1);
        assert_eq!(rtcp[0].data.len(), 28);
        assert_eq!(rtcp[0].data[1], PACKET_TYPE_SR);
        let report = SenderReport::parse(&rtcp[0].data).unwrap();
        assert_eq!(report.ssrc, stream.ssrc(MediaKind::Video));
    }

    #[test]
    fn sender_report_on_audio_only_client() {
        let (fanout, stream) =
            setup(StreamDescriptor::video("live", 1, 1, 0, 30).with_audio(48_000, 2));
        let buf = SharedBuf::default();
        let client = Arc::new(ClientSession::new(
            "127.0.0.1:1000".parse().unwrap(),
            "live",
            Arc::new(ConnectionWriter::from_writer(buf.clone())),
            60,
            stream.start_sequences(),
        ));
        client.set_delivery(
            MediaKind::Audio,
            Delivery::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1,
            },
        );
        client.set_state(SessionState::Playing);
        stream.add_client(client);

        fanout.push_video_frame("live", &idr(10), 0, false).unwrap();
        assert!(frames(&buf).is_empty());

        fanout.push_audio_frame("live", &[1, 2, 3], 1000).unwrap();
        let rtcp: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 1).collect();
        assert_eq!(rtcp.len(), 1);
        let report = SenderReport::parse(&rtcp[0].data).unwrap();
        assert_eq!(report.ssrc, stream.ssrc(MediaKind::Audio));
        assert_eq!(report.rtp_timestamp, 48_000);
    }

    /// Takes one write call, then fails every call after it, like a
    /// socket whose send buffer filled until the write timeout fired.
    struct Stalled(Arc<Mutex<usize>>);

    impl std::io::Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut calls = self.0.lock();
            *calls += 1;
            if *calls > 1 {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_client_dropped_for_rest_of_frame() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let calls = Arc::new(Mutex::new(0));
        let stalled = Arc::new(ClientSession::new(
            "127.0.0.1:999".parse().unwrap(),
            "live",
            Arc::new(ConnectionWriter::from_writer(Stalled(calls.clone()))),
            60,
            stream.start_sequences(),
        ));
        stalled.set_delivery(
            MediaKind::Video,
            Delivery::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1,
            },
        );
        stalled.set_state(SessionState::Playing);
        stream.add_client(stalled.clone());
        let healthy = playing_client(&stream, 1000, false);

        // About 43 FU-A fragments.
        fanout.push_video_frame("live", &idr(60_000), 0, false).unwrap();
        fanout.push_video_frame("live", &idr(60_000), 33, false).unwrap();

        assert!(stalled.writer().is_broken());
        assert_eq!(*calls.lock(), 2);

        let rtp: Vec<Frame> = frames(&healthy).into_iter().filter(|f| f.channel == 0).collect();
        let per_frame = h264::fragment_nal(&idr(60_000)[4..]).len();
        assert!(per_frame > 40);
        assert_eq!(rtp.len(), per_frame * 2);
    }

    #[test]
    fn audio_framed_and_marked() {
        let (fanout, stream) =
            setup(StreamDescriptor::video("live", 1, 1, 0, 30).with_audio(48_000, 2));
        let buf = playing_client(&stream, 1000, true);

        fanout.push_audio_frame("live", &[1, 2, 3, 4, 5], 1000).unwrap();
        let audio: Vec<Frame> = frames(&buf).into_iter().filter(|f| f.channel == 2).collect();
        assert_eq!(audio.len(), 1);
        let header = RtpHeader::parse(&audio[0].data).unwrap();
        assert!(header.marker);
        assert_eq!(header.payload_type, 97);
        assert_eq!(header.timestamp, 48_000);
        assert_eq!(header.ssrc, stream.ssrc(MediaKind::Audio));
        assert_eq!(&audio[0].data[RtpHeader::LEN..], &[0, 16, 0, 40, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn audio_dropped_when_disabled_or_not_set_up() {
        let (fanout, stream) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        let buf = playing_client(&stream, 1000, true);
        fanout.push_audio_frame("live", &[1, 2, 3], 0).unwrap();
        assert!(frames(&buf).is_empty());

        let (fanout, stream) =
            setup(StreamDescriptor::video("live", 1, 1, 0, 30).with_audio(44_100, 1));
        let video_only = playing_client(&stream, 1000, false);
        fanout.push_audio_frame("live", &[1, 2, 3], 0).unwrap();
        assert!(frames(&video_only).is_empty());
    }

    #[test]
    fn oversized_audio_is_an_error() {
        let (fanout, stream) =
            setup(StreamDescriptor::video("live", 1, 1, 0, 30).with_audio(44_100, 1));
        playing_client(&stream, 1000, true);
        let big = vec![0u8; aac::MAX_ACCESS_UNIT + 1];
        assert!(matches!(
            fanout.push_audio_frame("live", &big, 0),
            Err(RtspError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_path_is_an_error() {
        let (fanout, _) = setup(StreamDescriptor::video("live", 1, 1, 0, 30));
        assert!(matches!(
            fanout.push_video_frame("nope", &idr(1), 0, false),
            Err(RtspError::StreamNotFound(_))
        ));
    }

    #[test]
    fn parameter_set_changes_notify() {
        #[derive(Default)]
        struct Changes(Mutex<Vec<String>>);
        impl StreamEvents for Changes {
            fn on_parameter_sets_changed(&self, path: &str) {
                self.0.lock().push(path.to_string());
            }
        }

        let registry = StreamRegistry::new();
        registry
            .register(StreamDescriptor::video("live", 1, 1, 0, 30).with_audio(44_100, 1))
            .unwrap();
        let changes = Arc::new(Changes::default());
        let fanout = MediaFanout::new(
            registry,
            changes.clone(),
            Bandwidth::new(),
            Duration::from_secs(3),
        );

        fanout.set_video_parameter_sets("live", &[0x67], &[0x68]).unwrap();
        fanout.set_audio_config("live", &[0x12, 0x10]).unwrap();
        fanout
            .push_video_frame("live", &[0, 0, 1, 0x67, 1, 0, 0, 1, 0x68, 2], 0, true)
            .unwrap();
        assert_eq!(*changes.0.lock(), vec!["live", "live", "live"]);
    }
}
