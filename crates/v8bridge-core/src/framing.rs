//! `Content-Length` framing for the debuggee byte stream.
//!
//! Each message on the wire is a header block terminated by `\r\n\r\n`
//! followed by exactly `Content-Length` bytes of UTF-8 JSON:
//!
//! ```text
//! Content-Length: 7\r\n\r\n{"a":1}
//! ```
//!
//! The debuggee greets every new connection with a header-only frame
//! (`Content-Length: 0`) carrying `Type: connect` and version headers. That
//! frame is surfaced as [`Frame::Handshake`] rather than as a message.
//!
//! [`V8Codec`] plugs into `tokio_util::codec::FramedRead`/`FramedWrite`;
//! [`FrameReader`] wraps the same state machine for push-style callers.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::errors::BridgeError;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";
/// Upper bound on the body capacity reserved from a header before the bytes
/// actually arrive.
const MAX_RESERVE: usize = 64 * 1024;

/// One decoded unit of the debuggee stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Header-only greeting sent once per connection.
    Handshake {
        /// Header name/value pairs in arrival order.
        headers: Vec<(String, String)>,
    },
    /// A message body.
    Message(String),
}

#[derive(Debug)]
enum ReadState {
    AwaitingHeader,
    ReadingBody {
        len: usize,
        headers: Vec<(String, String)>,
    },
}

/// Codec for `Content-Length` framed messages.
#[derive(Debug)]
pub struct V8Codec {
    state: ReadState,
    framing_errors: u64,
    // Bytes of the buffer already searched for a header terminator.
    scanned: usize,
    max_frame_len: Option<usize>,
}

impl V8Codec {
    /// A codec waiting for its first header.
    pub fn new() -> Self {
        Self {
            state: ReadState::AwaitingHeader,
            framing_errors: 0,
            scanned: 0,
            max_frame_len: None,
        }
    }

    /// A codec that treats bodies longer than `max` bytes as framing errors.
    ///
    /// The oversized header block is skipped and decoding resumes at the next
    /// header, so a hostile length cannot stall the stream.
    pub fn with_max_frame_len(max: usize) -> Self {
        Self {
            max_frame_len: Some(max),
            ..Self::new()
        }
    }

    /// Number of malformed header blocks skipped so far.
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Whether the codec is between messages.
    pub fn is_awaiting_header(&self) -> bool {
        matches!(self.state, ReadState::AwaitingHeader)
    }

    /// Consume one complete header block from `buf` if present.
    ///
    /// `None` while the block is incomplete. A complete block without a usable
    /// length is still consumed and comes back as a framing error.
    fn take_header(
        &mut self,
        buf: &mut BytesMut,
    ) -> Option<Result<(usize, Vec<(String, String)>), BridgeError>> {
        // A terminator may straddle the previous scan boundary.
        let from = self.scanned.min(buf.len()).saturating_sub(HEADER_TERMINATOR.len() - 1);
        let Some(offset) = find(&buf[from..], HEADER_TERMINATOR) else {
            self.scanned = buf.len();
            return None;
        };
        let end = from + offset;
        self.scanned = 0;
        let block = buf.split_to(end + HEADER_TERMINATOR.len());
        let parsed = parse_header_block(&block[..end]).and_then(|(len, headers)| {
            match self.max_frame_len {
                Some(max) if len > max => Err(BridgeError::Framing(format!(
                    "Content-Length {len} exceeds the {max} byte limit"
                ))),
                _ => Ok((len, headers)),
            }
        });
        Some(parsed)
    }
}

impl Default for V8Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for V8Codec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            match &mut self.state {
                ReadState::AwaitingHeader => match self.take_header(buf) {
                    None => return Ok(None),
                    Some(Ok((len, headers))) => {
                        buf.reserve(len.min(MAX_RESERVE).saturating_sub(buf.len()));
                        self.state = ReadState::ReadingBody { len, headers };
                    }
                    Some(Err(e)) => {
                        self.framing_errors += 1;
                        warn!(error = %e, error_kind = e.error_kind(), "skipping malformed header block");
                    }
                },
                ReadState::ReadingBody { len, headers } => {
                    if buf.len() < *len {
                        return Ok(None);
                    }
                    let len = *len;
                    let headers = std::mem::take(headers);
                    self.state = ReadState::AwaitingHeader;

                    if len == 0 {
                        debug!(?headers, "received debugger handshake");
                        return Ok(Some(Frame::Handshake { headers }));
                    }
                    let body = buf.split_to(len);
                    return Ok(Some(Frame::Message(decode_body(&body))));
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if !buf.is_empty() {
            debug!(remaining = buf.len(), "discarding incomplete frame at end of stream");
            buf.clear();
        }
        self.state = ReadState::AwaitingHeader;
        self.scanned = 0;
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for V8Codec {
    type Error = io::Error;

    fn encode(&mut self, body: T, dst: &mut BytesMut) -> Result<(), io::Error> {
        write_frame(body.as_ref().as_bytes(), dst);
        Ok(())
    }
}

/// Push-style reader: feed bytes with [`append`](Self::append), pull frames
/// with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
    codec: V8Codec,
}

impl FrameReader {
    /// An empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        // The codec never returns an I/O error from `decode`.
        self.codec.decode(&mut self.buf).ok().flatten()
    }

    /// Next complete message body, skipping handshakes.
    pub fn next_message(&mut self) -> Option<String> {
        loop {
            match self.next_frame()? {
                Frame::Message(body) => return Some(body),
                Frame::Handshake { .. } => {}
            }
        }
    }

    /// Every message body currently available, in arrival order.
    pub fn drain_messages(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_message()).collect()
    }

    /// Bytes held but not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of malformed header blocks skipped so far.
    pub fn framing_errors(&self) -> u64 {
        self.codec.framing_errors()
    }
}

/// Frame a message body: `Content-Length: <bytes>\r\n\r\n<body>`.
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut dst = BytesMut::new();
    write_frame(body.as_bytes(), &mut dst);
    dst.to_vec()
}

fn write_frame(body: &[u8], dst: &mut BytesMut) {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    dst.reserve(header.len() + body.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(body);
}

fn parse_header_block(block: &[u8]) -> Result<(usize, Vec<(String, String)>), BridgeError> {
    let headers: Vec<(String, String)> = block
        .split(|b| *b == b'\n')
        .filter_map(|line| {
            let line = String::from_utf8_lossy(line);
            let (name, value) = line.trim_end_matches('\r').split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect();

    let Some((_, raw)) = headers.iter().find(|(name, _)| is_content_length(name)) else {
        return Err(BridgeError::Framing(format!(
            "header block without Content-Length ({} bytes)",
            block.len()
        )));
    };
    let len = raw
        .parse::<usize>()
        .map_err(|_| BridgeError::Framing(format!("invalid Content-Length: {raw:?}")))?;

    Ok((len, headers))
}

/// Whether a header name is `Content-Length`, ignoring case and any stray
/// bytes left in front of it by a previous frame. A longer token such as
/// `X-Content-Length` does not count.
fn is_content_length(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    let Some(prefix) = lowered.strip_suffix(CONTENT_LENGTH) else {
        return false;
    };
    !matches!(
        prefix.chars().next_back(),
        Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '_'
    )
}

fn decode_body(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_owned(),
        Err(e) => {
            warn!(error = %e, len = body.len(), "frame body is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
