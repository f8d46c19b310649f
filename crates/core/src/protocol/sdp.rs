//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:rtsp-streamer                          ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! m=video 0 RTP/AVP 96                          ← video (always)
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;profile-level-id=42e01f;sprop-parameter-sets=<sps>,<pps>
//! a=control:track0
//! m=audio 0 RTP/AVP 97                          ← audio (when enabled)
//! a=rtpmap:97 MPEG4-GENERIC/<rate>/<channels>
//! a=fmtp:97 profile-level-id=1;mode=AAC-hbr;...;config=<config>
//! a=control:track1
//! ```
//!
//! Parameter sets are base64-encoded from the stream's current state, so a
//! DESCRIBE before the encoder delivered them yields an empty
//! `sprop-parameter-sets=,`.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::media::aac;
use crate::media::rtp::{AUDIO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE, VIDEO_PAYLOAD_TYPE};
use crate::server::ServerConfig;
use crate::stream::StreamInstance;

/// `profile-level-id` advertised for the video track.
pub const PROFILE_LEVEL_ID: &str = "42e01f";

/// `sprop-parameter-sets` value: base64 SPS and PPS, comma separated.
pub fn sprop_parameter_sets(stream: &StreamInstance) -> String {
    match stream.video_parameter_sets() {
        Some(sets) => format!(
            "{},{}",
            BASE64_STANDARD.encode(&sets.sps),
            BASE64_STANDARD.encode(&sets.pps)
        ),
        None => ",".to_string(),
    }
}

/// Generate an SDP session description for the given stream.
pub fn generate_sdp(stream: &StreamInstance, ip: &str, config: &ServerConfig) -> String {
    let descriptor = stream.descriptor();
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        config.sdp_username, config.sdp_session_id, config.sdp_session_version, ip
    ));
    sdp.push(format!("s={}", config.sdp_session_name));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtsp-streamer".to_string());
    sdp.push("a=sendonly".to_string());

    sdp.push(format!("m=video 0 RTP/AVP {}", VIDEO_PAYLOAD_TYPE));
    if descriptor.video_bitrate > 0 {
        sdp.push(format!("b=AS:{}", descriptor.video_bitrate / 1000));
    }
    sdp.push(format!("a=rtpmap:{} H264/{}", VIDEO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE));
    sdp.push(format!(
        "a=fmtp:{} packetization-mode=1;profile-level-id={};sprop-parameter-sets={}",
        VIDEO_PAYLOAD_TYPE,
        PROFILE_LEVEL_ID,
        sprop_parameter_sets(stream)
    ));
    if descriptor.frame_rate > 0 {
        sdp.push(format!("a=framerate:{}", descriptor.frame_rate));
    }
    sdp.push(format!(
        "a=x-dimensions:{},{}",
        descriptor.width, descriptor.height
    ));
    sdp.push("a=control:track0".to_string());

    if descriptor.audio_enabled {
        let config_b64 = stream
            .audio_config()
            .map(|c| BASE64_STANDARD.encode(c.as_slice()))
            .unwrap_or_default();

        sdp.push(format!("m=audio 0 RTP/AVP {}", AUDIO_PAYLOAD_TYPE));
        sdp.push(format!(
            "a=rtpmap:{} MPEG4-GENERIC/{}/{}",
            AUDIO_PAYLOAD_TYPE, descriptor.audio_sample_rate, descriptor.audio_channels
        ));
        sdp.push(format!(
            "a=fmtp:{} {}",
            AUDIO_PAYLOAD_TYPE,
            aac::fmtp_parameters(&config_b64)
        ));
        sdp.push("a=control:track1".to_string());
    }

    tracing::debug!(path = %stream.path(), "SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamDescriptor;

    fn video_stream() -> StreamInstance {
        StreamInstance::new(StreamDescriptor::video("live", 1280, 720, 2_000_000, 30))
    }

    fn config() -> ServerConfig {
        ServerConfig {
            sdp_username: "server".to_string(),
            sdp_session_id: "1234567890".to_string(),
            sdp_session_version: "1".to_string(),
            sdp_session_name: "Test Session".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn generates_h264_sdp() {
        let sdp = generate_sdp(&video_stream(), "192.168.1.100", &config());
        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=server 1234567890 1 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(
            sdp.contains("c=IN IP4 192.168.1.100\r\n"),
            "c= must use configured IP, not 0.0.0.0"
        );
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains(
            "a=fmtp:96 packetization-mode=1;profile-level-id=42e01f;sprop-parameter-sets=,\r\n"
        ));
        assert!(sdp.contains("a=control:track0\r\n"));
        assert!(!sdp.contains("m=audio"), "audio disabled");

        // rtpmap must come before fmtp (RFC 6184 §8.2.1)
        let rtpmap_idx = sdp.find("a=rtpmap").expect("SDP must include rtpmap");
        let fmtp_idx = sdp.find("a=fmtp").expect("SDP must include fmtp");
        assert!(rtpmap_idx < fmtp_idx);

        // Session-level attrs must come before media section
        let sendonly_idx = sdp.find("a=sendonly").expect("SDP must include sendonly");
        let m_idx = sdp.find("m=video").expect("SDP must include media section");
        assert!(sendonly_idx < m_idx);
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
    }

    #[test]
    fn sprop_round_trips_parameter_sets() {
        let stream = video_stream();
        let sps = vec![0x67, 0x42, 0x00, 0x1e, 0xab];
        let pps = vec![0x68, 0xce, 0x38, 0x80];
        stream.set_video_parameter_sets(&sps, &pps);

        let sprop = sprop_parameter_sets(&stream);
        let (a, b) = sprop.split_once(',').unwrap();
        assert_eq!(BASE64_STANDARD.decode(a).unwrap(), sps);
        assert_eq!(BASE64_STANDARD.decode(b).unwrap(), pps);

        let sdp = generate_sdp(&stream, "10.0.0.1", &config());
        assert!(sdp.contains(&format!("sprop-parameter-sets={}\r\n", sprop)));
    }

    #[test]
    fn audio_section_when_enabled() {
        let stream = StreamInstance::new(
            StreamDescriptor::video("live", 640, 480, 1_000_000, 25).with_audio(44_100, 2),
        );
        stream.set_audio_config(&[0x12, 0x10]);

        let sdp = generate_sdp(&stream, "10.0.0.1", &config());
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\n"));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n"));
        assert!(sdp.contains(
            "a=fmtp:97 profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config=EhA=\r\n"
        ));
        assert!(sdp.contains("a=control:track1\r\n"));
        assert!(sdp.find("m=video").unwrap() < sdp.find("m=audio").unwrap());
    }
}
