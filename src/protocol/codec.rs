//! Newline-delimited JSON framing
//!
//! Encoding writes one envelope per line. Decoding is incremental: chunks are
//! buffered until a newline completes a frame, so a frame may be split across
//! any number of reads.

use crate::error::{BusError, Result};
use crate::protocol::Envelope;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Serialize an envelope to a single newline-terminated frame
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let mut buf = serde_json::to_vec(envelope)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

/// Wrap a byte stream in a frame decoder
///
/// The returned stream is not restartable; build a new one per body.
pub fn decode<S>(body: S) -> FrameStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    FrameStream::new(body)
}

fn parse_line(line: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(line).map_err(BusError::MalformedFrame)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Push-based decoder that buffers partial lines
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    // Bytes already searched for a newline
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
        }
    }

    /// Append a chunk read from the underlying stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Envelope>> {
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let line = self.buf.split_to(pos + 1);
            let line = &line[..pos];
            if is_blank(line) {
                continue;
            }
            return parse_line(line).map(Some);
        }
        self.scanned = self.buf.len();
        Ok(None)
    }

    /// Parse whatever is left once the underlying stream has ended
    pub fn finish(&mut self) -> Result<Option<Envelope>> {
        let rest = self.buf.split();
        self.scanned = 0;
        if is_blank(&rest) {
            return Ok(None);
        }
        parse_line(&rest).map(Some)
    }

    /// Number of bytes waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Stream of envelopes decoded from a byte stream
///
/// Ends when the body ends. The first error (transport or malformed frame)
/// is yielded once and then the stream ends.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    done: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            done: false,
        }
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Envelope>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match this.decoder.next_frame() {
                Ok(Some(envelope)) => return Poll::Ready(Some(Ok(envelope))),
                Ok(None) => {}
                Err(e) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.decoder.push(&chunk),
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    return Poll::Ready(this.decoder.finish().transpose());
                }
            }
        }
    }
}
