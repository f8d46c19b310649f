//! Multi-stream RTSP server with RTP/RTCP delivery over UDP or TCP-interleaved
//! transport.
//!
//! ```text
//!   encoder threads                       client connections
//!        │                                        │
//!  push_video_frame / push_audio_frame     transport::tcp (1 thread each)
//!        │                                        │
//!        ▼                                        ▼
//!    fanout::MediaFanout ──► stream::StreamRegistry ◄── protocol::MethodHandler
//!        │                       (clients per path)
//!        ▼
//!  media (H.264 FU-A, AAC, RTP, RTCP) ──► transport::sender ──► TCP `$` / UDP
//! ```

pub mod error;
pub mod events;
pub mod fanout;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;
pub mod stream;
pub mod transport;

pub use error::{Result, RtspError};
pub use events::{NoopEvents, StreamEvents};
pub use protocol::Credentials;
pub use server::{Server, ServerConfig};
pub use stream::{StreamDescriptor, StreamStats};
