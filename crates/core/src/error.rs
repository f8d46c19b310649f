//! Error types for the RTSP streaming library.

use std::fmt;

/// Errors that can occur in the RTSP streaming library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse): malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io): socket/network failures.
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Registry**: [`StreamNotFound`](Self::StreamNotFound),
///   [`StreamAlreadyRegistered`](Self::StreamAlreadyRegistered).
/// - **Media**: [`PayloadTooLarge`](Self::PayloadTooLarge).
///
/// Per-connection and per-send failures are logged where they happen and
/// never surface here; only start-up and registration errors reach callers.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Server-side UDP port allocation exhausted the 5000–65534 range.
    #[error("port range exhausted (tried to allocate beyond u16 range)")]
    PortRangeExhausted,

    /// No stream registered at the requested path.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A stream with the same path is already registered.
    #[error("stream already registered: {0}")]
    StreamAlreadyRegistered(String),

    /// Access unit does not fit in the payload format's size field.
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a number.
    InvalidContentLength,
    /// `Content-Length` exceeds the largest body the server accepts.
    BodyTooLarge { len: usize, max: usize },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::BodyTooLarge { len, max } => {
                write!(f, "body of {len} bytes exceeds maximum of {max}")
            }
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
