use std::io::{self, BufRead, Read};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::transport::interleaved::INTERLEAVED_MAGIC;

/// Largest request body read from a client. RTSP bodies here are short
/// parameter lists.
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2; clients differ in
/// how they case `CSeq`, `Session` and `Transport`.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/live/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Body of `Content-Length` bytes, if any.
    pub body: Option<String>,
}

impl RtspRequest {
    /// Parse an RTSP request head from its text representation.
    ///
    /// Expects the request line and headers, optionally followed by the
    /// trailing blank line. The body is not part of `raw`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() < 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: None,
        })
    }

    /// Read the next request from a connection.
    ///
    /// Returns `Ok(None)` when the peer closed the stream before sending
    /// anything. Interleaved `$` frames sent by the client (RTCP receiver
    /// reports in TCP mode) are consumed and skipped. The second tuple
    /// element is the number of bytes consumed, skipped frames included.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0usize;

        loop {
            let first = match reader.fill_buf()?.first() {
                Some(&b) => b,
                None => return Ok(None),
            };

            match first {
                INTERLEAVED_MAGIC => consumed += skip_interleaved(reader)?,
                b'\r' | b'\n' => {
                    reader.consume(1);
                    consumed += 1;
                }
                _ => break,
            }
        }

        let mut head = String::new();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                )
                .into());
            }
            consumed += n;
            head.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        let mut request = Self::parse(&head)?;

        if let Some(len) = request.content_length()? {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            consumed += len;
            request.body = Some(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(Some((request, consumed)))
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session ID from the `Session` header, without the `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }

    /// Declared body length, rejected above [`MAX_BODY_LEN`].
    fn content_length(&self) -> Result<Option<usize>> {
        let Some(value) = self.get_header("Content-Length") else {
            return Ok(None);
        };
        let len = value.parse::<usize>().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidContentLength,
        })?;
        if len > MAX_BODY_LEN {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge {
                    len,
                    max: MAX_BODY_LEN,
                },
            });
        }
        Ok((len > 0).then_some(len))
    }
}

/// Consume one `$`-framed block. Returns the bytes skipped.
fn skip_interleaved<R: BufRead>(reader: &mut R) -> Result<usize> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = u16::from_be_bytes([header[2], header[3]]) as u64;
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated interleaved frame").into());
    }
    tracing::trace!(channel = header[1], len, "skipped inbound interleaved frame");
    Ok(header.len() + len as usize)
}
