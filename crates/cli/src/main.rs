use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rtsp::media::h264;
use rtsp::{Credentials, Server, ServerConfig, StreamDescriptor, StreamEvents};

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "Standalone RTSP server streaming an H.264 Annex B file"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Stream path clients connect to (rtsp://host:port/<path>)
    #[arg(long, default_value = "live")]
    path: String,

    /// H.264 Annex B elementary stream to loop
    #[arg(long, short)]
    file: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Advertised video bitrate in bits per second
    #[arg(long, default_value_t = 2_000_000)]
    bitrate: u32,

    /// Require authentication with this username (needs --password)
    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Host advertised in SDP instead of the one clients connect to
    #[arg(long)]
    public_host: Option<String>,
}

/// Logs client activity.
struct LogEvents;

impl StreamEvents for LogEvents {
    fn on_client_connected(&self, path: &str, total: usize) {
        tracing::info!(path, total, "viewer joined");
    }

    fn on_client_disconnected(&self, path: &str, total: usize) {
        tracing::info!(path, total, "viewer left");
    }
}

/// Access units of an Annex B file, split at every slice NAL unit.
struct Clip {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    frames: Vec<Vec<u8>>,
    key_frames: Vec<usize>,
}

impl Clip {
    fn parse(data: &[u8]) -> Self {
        let mut clip = Clip {
            sps: None,
            pps: None,
            frames: Vec::new(),
            key_frames: Vec::new(),
        };

        for nal in h264::extract_nal_units(data) {
            match h264::nal_type(nal) {
                Some(h264::NAL_TYPE_SPS) => clip.sps = Some(nal.to_vec()),
                Some(h264::NAL_TYPE_PPS) => clip.pps = Some(nal.to_vec()),
                Some(t @ (1 | h264::NAL_TYPE_IDR)) => {
                    if t == h264::NAL_TYPE_IDR {
                        clip.key_frames.push(clip.frames.len());
                    }
                    let mut frame = vec![0, 0, 0, 1];
                    frame.extend_from_slice(nal);
                    clip.frames.push(frame);
                }
                _ => {}
            }
        }
        clip
    }

    /// First key frame at or after `from`, wrapping to the start.
    fn next_key_frame(&self, from: usize) -> usize {
        self.key_frames
            .iter()
            .copied()
            .find(|&i| i >= from)
            .or_else(|| self.key_frames.first().copied())
            .unwrap_or(from)
    }
}

/// Push the clip in a loop at `fps` until `stop` is set.
fn feed(server: &Server, path: &str, clip: &Clip, fps: u32, stop: &AtomicBool) {
    if let (Some(sps), Some(pps)) = (&clip.sps, &clip.pps)
        && let Err(e) = server.set_video_parameter_sets(path, sps, pps)
    {
        tracing::error!(error = %e, "failed to set parameter sets");
        return;
    }

    let interval = Duration::from_secs(1) / fps.max(1);
    let started = Instant::now();
    let mut index = 0usize;
    let mut sent = 0u64;

    while !stop.load(Ordering::SeqCst) {
        if server.take_key_frame_request(path) {
            index = clip.next_key_frame(index);
            tracing::debug!(index, "jumping to key frame for new viewer");
        }

        let timestamp_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = server.push_video_frame(path, &clip.frames[index], timestamp_ms, false) {
            tracing::error!(error = %e, "push failed");
            return;
        }

        sent += 1;
        index = (index + 1) % clip.frames.len();

        let next = started + interval * sent as u32;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let credentials = match (&args.username, &args.password) {
        (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
        _ => None,
    };

    let clip = match &args.file {
        Some(file) => {
            let clip = Clip::parse(&std::fs::read(file)?);
            if clip.frames.is_empty() {
                return Err(format!("{} contains no H.264 slices", file.display()).into());
            }
            tracing::info!(
                file = %file.display(),
                frames = clip.frames.len(),
                key_frames = clip.key_frames.len(),
                "clip loaded"
            );
            Some(clip)
        }
        None => None,
    };

    let mut server = Server::new(ServerConfig {
        bind_addr: args.bind.clone(),
        credentials,
        public_host: args.public_host.clone(),
        sdp_session_name: args.path.clone(),
        ..ServerConfig::default()
    })
    .with_events(Arc::new(LogEvents));

    server.register(StreamDescriptor::video(
        &args.path,
        args.width,
        args.height,
        args.bitrate,
        args.fps,
    ))?;
    server.start()?;

    let addr = server
        .local_addr()
        .map_or_else(|| args.bind.clone(), |a| a.to_string());
    println!(
        "RTSP server on rtsp://{}/{}, press Enter to stop",
        addr, args.path
    );

    let stop = AtomicBool::new(false);
    thread::scope(|scope| {
        if let Some(clip) = &clip {
            scope.spawn(|| feed(&server, &args.path, clip, args.fps, &stop));
        }

        let mut input = String::new();
        if let Err(e) = io::stdin().read_line(&mut input) {
            tracing::warn!(error = %e, "stdin closed");
        }
        stop.store(true, Ordering::SeqCst);
    });

    server.stop();
    Ok(())
}
