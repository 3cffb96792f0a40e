//! AMI packet framing
//!
//! Turns a byte stream into [`Frame`]s: a complete [`Packet`], a "no data"
//! sentinel when the read timeout passes with nothing to deliver, or a
//! "stream closed" sentinel on EOF.

use crate::{
    buffer::AmiBuffer,
    error::{AmiError, AmiResult},
    packet::Packet,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::trace;

/// Result of one framing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A packet with at least one field.
    Packet(Packet),
    /// Read timeout elapsed (or a stray blank line arrived) with no fields.
    NoData,
    /// Peer closed the stream.
    Closed,
}

/// Split a line at its first colon into a trimmed `(field, value)` pair.
///
/// Lines without a colon, or with nothing before it, are not fields.
pub(crate) fn parse_field(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Incremental AMI parser.
///
/// Holds raw bytes that have not formed a line yet and the fields of the
/// packet currently being assembled, so both survive across reads.
#[derive(Debug, Default)]
pub struct AmiParser {
    buffer: AmiBuffer,
    pending: Packet,
    eof: bool,
}

impl AmiParser {
    /// Create new parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()
    }

    /// Take the next complete raw line, if any.
    ///
    /// Used for the greeting banner, which is a bare line rather than a packet.
    pub fn next_line(&mut self) -> Option<String> {
        let line = self
            .buffer
            .extract_line()?;
        self.buffer
            .compact();
        Some(
            String::from_utf8_lossy(&line)
                .into_owned(),
        )
    }

    /// Try to assemble a packet from buffered lines.
    ///
    /// Returns `Some` when a blank line is reached. The packet is empty when
    /// the blank line had no fields before it.
    pub fn parse_packet(&mut self) -> Option<Packet> {
        while let Some(line) = self.next_line() {
            if line
                .trim()
                .is_empty()
            {
                return Some(std::mem::take(&mut self.pending));
            }
            self.push_line(&line);
        }
        None
    }

    /// Fields collected so far without a terminating blank line.
    ///
    /// Called when the read times out or the peer closes: whatever has been
    /// collected is the packet.
    pub fn take_partial(&mut self) -> Option<Packet> {
        if self
            .pending
            .is_empty()
        {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Mark the stream as ended and fold any unterminated tail into the
    /// pending packet.
    fn finish(&mut self) {
        self.eof = true;
        if self
            .buffer
            .is_empty()
        {
            return;
        }
        let tail = self
            .buffer
            .take_remaining();
        let line = String::from_utf8_lossy(&tail).into_owned();
        self.push_line(&line);
    }

    fn push_line(&mut self, line: &str) {
        match parse_field(line) {
            Some((key, value)) => self
                .pending
                .insert(key, value),
            None => trace!("[RECV] Skipping non-field line: {:?}", line),
        }
    }
}

/// Read the next frame from `reader`.
///
/// Blocks for at most `read_timeout` per socket read. When the timeout or EOF
/// interrupts a packet, the fields collected so far are returned; EOF is then
/// reported as [`Frame::Closed`] on the following call.
pub async fn read_frame<R>(
    reader: &mut R,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    read_timeout: Duration,
) -> AmiResult<Frame>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(packet) = parser.parse_packet() {
            if packet.is_empty() {
                return Ok(Frame::NoData);
            }
            trace!("[RECV] Parsed packet with {} fields", packet.len());
            return Ok(Frame::Packet(packet));
        }

        if parser.eof {
            return Ok(match parser.take_partial() {
                Some(packet) => Frame::Packet(packet),
                None => Frame::Closed,
            });
        }

        match timeout(read_timeout, reader.read(read_buffer)).await {
            Ok(Ok(0)) => {
                trace!("[RECV] EOF");
                parser.finish();
            }
            Ok(Ok(n)) => {
                trace!("[RECV] Read {} bytes from socket", n);
                parser.add_data(&read_buffer[..n])?;
            }
            Ok(Err(e)) => return Err(AmiError::Io(e)),
            Err(_) => {
                return Ok(match parser.take_partial() {
                    Some(packet) => Frame::Packet(packet),
                    None => Frame::NoData,
                });
            }
        }
    }
}

/// Read one bare line (the greeting banner).
pub async fn read_line<R>(
    reader: &mut R,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    read_timeout: Duration,
) -> AmiResult<String>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(line) = parser.next_line() {
            return Ok(line);
        }

        match timeout(read_timeout, reader.read(read_buffer)).await {
            Ok(Ok(0)) => return Err(AmiError::ConnectionClosed),
            Ok(Ok(n)) => parser.add_data(&read_buffer[..n])?,
            Ok(Err(e)) => return Err(AmiError::Io(e)),
            Err(_) => {
                return Err(AmiError::Timeout {
                    timeout_ms: read_timeout.as_millis() as u64,
                })
            }
        }
    }
}
