//! Line transport: one envelope per newline-terminated line over any duplex
//! byte stream (a child process's stdin/stdout, a socket, an in-memory pipe).
//!
//! There is no session concept. The stream is assumed to carry exactly one
//! logical peer for its whole lifetime.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead, FramedWrite, LinesCodec,
    LinesCodecError,
};
use wirebus_core::{Envelope, Transport, TransportError};

/// Default bound on a single inbound line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct LineConfig {
    /// Longest line accepted by `recv`, excluding the terminator.
    pub max_line_bytes: usize,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl LineConfig {
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }
}

/// One inbound frame: the raw bytes of a line, or a marker that a line blew
/// past the limit and was discarded.
#[derive(Debug, PartialEq)]
enum Line {
    Bytes(Bytes),
    TooLong,
}

/// Byte-level line framing that reports an over-long line as a frame
/// instead of a codec error, so `FramedRead` keeps decoding what is
/// already buffered. Bytes are never checked for UTF-8 here.
struct BoundedLines {
    inner: AnyDelimiterCodec,
}

impl BoundedLines {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                Vec::new(),
                max_line_bytes,
            ),
        }
    }

    fn lift(result: Result<Option<Bytes>, AnyDelimiterCodecError>) -> io::Result<Option<Line>> {
        match result {
            Ok(frame) => Ok(frame.map(Line::Bytes)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Line::TooLong)),
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for BoundedLines {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Line>> {
        Self::lift(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Line>> {
        Self::lift(self.inner.decode_eof(src))
    }
}

pub struct LineTransport<R, W> {
    reader: Mutex<FramedRead<R, BoundedLines>>,
    // Held across the whole write so concurrent senders never interleave lines.
    writer: Mutex<FramedWrite<W, LinesCodec>>,
    config: LineConfig,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, LineConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: LineConfig) -> Self {
        Self {
            reader: Mutex::new(FramedRead::new(reader, BoundedLines::new(config.max_line_bytes))),
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
            config,
        }
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    fn reject(&self, err: TransportError) -> TransportError {
        tracing::warn!(error = %err, kind = err.error_kind(), "rejected inbound line");
        err
    }
}

/// Line transport over the process's own stdin/stdout.
pub fn stdio(config: LineConfig) -> LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    LineTransport::with_config(tokio::io::stdin(), tokio::io::stdout(), config)
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Next envelope from the stream. Lines holding only whitespace are
    /// skipped, not reported as decode errors. Malformed or over-long lines
    /// return an error and the following line is still readable.
    async fn recv(&self) -> Result<Option<Envelope>, TransportError> {
        let mut frames = self.reader.lock().await;
        loop {
            let line = match frames.next().await {
                None => {
                    tracing::debug!("line stream reached end of input");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(self.reject(TransportError::Io(e))),
                Some(Ok(Line::TooLong)) => {
                    return Err(self.reject(TransportError::LineTooLong {
                        limit: self.config.max_line_bytes,
                    }));
                }
                Some(Ok(Line::Bytes(line))) => line,
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let envelope = Envelope::decode(&line).map_err(|e| self.reject(e))?;
            tracing::trace!(
                message_id = ?envelope.id,
                method = envelope.method.as_deref().unwrap_or(""),
                "received envelope"
            );
            return Ok(Some(envelope));
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let line = envelope.encode()?;
        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|e| match e {
            LinesCodecError::Io(e) => TransportError::Io(e),
            other => TransportError::Io(io::Error::other(other)),
        })?;
        tracing::trace!(message_id = ?envelope.id, "sent envelope");
        Ok(())
    }
}
