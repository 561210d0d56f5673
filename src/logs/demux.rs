//! Docker multiplexed log stream format.
//!
//! A container without a TTY interleaves stdout and stderr on one connection.
//! Every frame has an 8-byte header followed by the payload:
//!
//! ```text
//! [stream type, 0, 0, 0, len >> 24, len >> 16, len >> 8, len]
//! ```
//!
//! Stream type `2` is stderr. Types `0` (stdin) and `1` (stdout), and any
//! unknown type, are treated as stdout.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_util::codec::Decoder;

use crate::runtime::{LogByteStream, RuntimeError};

pub const HEADER_LEN: usize = 8;

/// Largest payload accepted in one frame. Longer frames are skipped without
/// being buffered, and [`encode_frame`] splits payloads at this size.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Frames buffered per side before the pump waits for the session.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Stdout,
    Stderr,
}

impl Origin {
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            2 => Origin::Stderr,
            _ => Origin::Stdout,
        }
    }

    pub fn stream_type(self) -> u8 {
        match self {
            Origin::Stdout => 1,
            Origin::Stderr => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Stdout => "stdout",
            Origin::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub origin: Origin,
    pub payload: Bytes,
}

/// Writes `payload` in wire format, as several frames when it is longer
/// than [`MAX_FRAME_LEN`]. An empty payload still produces one frame.
pub fn encode_frame(origin: Origin, payload: &[u8]) -> Bytes {
    let frames = payload.len().div_ceil(MAX_FRAME_LEN).max(1);
    let mut buf = BytesMut::with_capacity(frames * HEADER_LEN + payload.len());
    let mut rest = payload;
    loop {
        let (chunk, tail) = rest.split_at(rest.len().min(MAX_FRAME_LEN));
        let Ok(len) = u32::try_from(chunk.len()) else {
            unreachable!("chunks are at most MAX_FRAME_LEN bytes");
        };
        buf.put_u8(origin.stream_type());
        buf.put_bytes(0, 3);
        buf.put_u32(len);
        buf.extend_from_slice(chunk);
        if tail.is_empty() {
            break;
        }
        rest = tail;
    }
    buf.freeze()
}

/// Incremental frame parser. Frames may be split across or packed into
/// arbitrary transport chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Payload bytes of an oversized frame not yet skipped.
    skipping: usize,
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        loop {
            if self.skipping > 0 {
                let n = self.skipping.min(src.len());
                src.advance(n);
                self.skipping -= n;
                if self.skipping > 0 {
                    return Ok(None);
                }
            }
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
            if len > MAX_FRAME_LEN {
                log::warn!("Skipping log frame declaring {len} bytes");
                src.advance(HEADER_LEN);
                self.skipping = len;
                continue;
            }
            if src.len() < HEADER_LEN + len {
                src.reserve(HEADER_LEN + len - src.len());
                return Ok(None);
            }
            let origin = Origin::from_stream_type(src[0]);
            src.advance(HEADER_LEN);
            let payload = src.split_to(len).freeze();
            return Ok(Some(Frame { origin, payload }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    log::debug!("Discarding {} bytes of a truncated log frame", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

/// Aborts the pump once neither side is read anymore.
struct PumpGuard(AbortHandle);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The two halves of a multiplexed stream.
pub struct Demuxed {
    pub stdout: LogByteStream,
    pub stderr: LogByteStream,
}

/// Splits a multiplexed stream into independent stdout and stderr streams.
///
/// A background pump owns the raw stream. Errors on the raw stream are
/// forwarded once, on stdout, and end both halves. Dropping both halves
/// aborts the pump and with it the raw stream.
pub fn demultiplex(raw: LogByteStream) -> Demuxed {
    let (stdout_tx, stdout_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (stderr_tx, stderr_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let pump = tokio::spawn(pump(raw, stdout_tx, stderr_tx));
    let guard = Arc::new(PumpGuard(pump.abort_handle()));
    Demuxed {
        stdout: receiver_stream(stdout_rx, Arc::clone(&guard)),
        stderr: receiver_stream(stderr_rx, guard),
    }
}

type Side = mpsc::Sender<Result<Bytes, RuntimeError>>;

fn receiver_stream(
    rx: mpsc::Receiver<Result<Bytes, RuntimeError>>,
    guard: Arc<PumpGuard>,
) -> LogByteStream {
    Box::pin(futures_util::stream::unfold(
        (rx, guard),
        |(mut rx, guard)| async move { rx.recv().await.map(|item| (item, (rx, guard))) },
    ))
}

async fn pump(mut raw: LogByteStream, stdout: Side, stderr: Side) {
    let mut decoder = FrameDecoder::default();
    let mut buf = BytesMut::new();

    while let Some(item) = raw.next().await {
        match item {
            Ok(chunk) => {
                buf.extend_from_slice(&chunk);
                while let Ok(Some(frame)) = decoder.decode(&mut buf) {
                    forward(frame, &stdout, &stderr).await;
                }
                if stdout.is_closed() && stderr.is_closed() {
                    return;
                }
            }
            Err(e) => {
                let _ = stdout.send(Err(e)).await;
                return;
            }
        }
    }

    if let Ok(Some(frame)) = decoder.decode_eof(&mut buf) {
        forward(frame, &stdout, &stderr).await;
    }
}

async fn forward(frame: Frame, stdout: &Side, stderr: &Side) {
    let side = match frame.origin {
        Origin::Stdout => stdout,
        Origin::Stderr => stderr,
    };
    // A closed side is simply no longer read.
    let _ = side.send(Ok(frame.payload)).await;
}
