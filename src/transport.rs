//! Length-prefixed JSON framing over blocking and async byte streams.

use serde::{de::DeserializeOwned, Serialize};
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::FrameError;

/// Largest frame we send towards the host (browser -> host limit).
pub const MAX_TO_HOST: usize = 64 * 1_048_576; // 64 MB
/// Largest frame we accept from the host (host -> browser limit).
pub const MAX_FROM_HOST: usize = 1_048_576; // 1 MB

const LEN_PREFIX: usize = 4;

pub type Result<T> = std::result::Result<T, FrameError>;

/// Encode any serde-serializable value into a native-messaging frame:
/// 4-byte native-endian length + JSON bytes.
pub fn encode_message<T: Serialize>(msg: &T, max_size: usize) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > max_size || json.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            size: json.len(),
            max: max_size,
        });
    }
    let mut out = Vec::with_capacity(LEN_PREFIX + json.len());
    out.extend_from_slice(&(json.len() as u32).to_ne_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Decode a single framed message from a blocking reader (useful in tests
/// and for simple synchronous hosts).
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
pub fn decode_message<R: Read>(reader: &mut R, max_size: usize) -> Result<Option<String>> {
    let mut len_buf = [0u8; LEN_PREFIX];
    let got = fill_blocking(&mut *reader, &mut len_buf)?;
    let Some(len) = frame_len(&len_buf, got, max_size)? else {
        return Ok(None);
    };
    let mut buf = vec![0u8; len];
    let got = fill_blocking(&mut *reader, &mut buf)?;
    if got < len {
        return Err(FrameError::Truncated {
            expected: len,
            read: got,
        });
    }
    Ok(Some(String::from_utf8(buf)?))
}

fn fill_blocking<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn fill<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Validate a (possibly short) length prefix.
///
/// Zero bytes means the peer closed between frames; a partial prefix is a
/// truncated frame.
fn frame_len(len_buf: &[u8; LEN_PREFIX], got: usize, max_size: usize) -> Result<Option<usize>> {
    match got {
        0 => Ok(None),
        LEN_PREFIX => {
            let len = u32::from_ne_bytes(*len_buf) as usize;
            if len > max_size {
                return Err(FrameError::TooLarge {
                    size: len,
                    max: max_size,
                });
            }
            Ok(Some(len))
        }
        read => Err(FrameError::Truncated {
            expected: LEN_PREFIX,
            read,
        }),
    }
}

/// Reads complete frames from an async byte stream.
///
/// Each call to [`FrameReader::read_frame`] yields the next frame, so the
/// reader doubles as a lazy sequence that can be resumed after any
/// non-fatal decode error.
pub struct FrameReader<R> {
    inner: R,
    max_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_size: usize) -> Self {
        Self { inner, max_size }
    }

    /// Next raw JSON payload, or `None` on a clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; LEN_PREFIX];
        let got = fill(&mut self.inner, &mut len_buf).await?;
        let Some(len) = frame_len(&len_buf, got, self.max_size)? else {
            return Ok(None);
        };
        let mut buf = vec![0u8; len];
        let got = fill(&mut self.inner, &mut buf).await?;
        if got < len {
            return Err(FrameError::Truncated {
                expected: len,
                read: got,
            });
        }
        trace!(len, "frame in");
        Ok(Some(buf))
    }

    /// Next frame decoded as `T`.
    ///
    /// A frame that is not valid UTF-8 JSON for `T` is reported as an error,
    /// but the stream stays aligned so reading may continue.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.read_frame().await? {
            Some(buf) => {
                let text = String::from_utf8(buf)?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole frames to an async byte stream.
pub struct FrameWriter<W> {
    inner: W,
    max_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_size: usize) -> Self {
        Self { inner, max_size }
    }

    /// Encode and write one message with a single `write_all`, then flush.
    /// Returns the payload length.
    pub async fn write_message<T: Serialize>(&mut self, msg: &T) -> Result<usize> {
        let frame = encode_message(msg, self.max_size)?;
        self.write_frame(&frame).await
    }

    /// Write a frame produced by [`encode_message`]. Returns the payload length.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<usize> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        let len = frame.len().saturating_sub(LEN_PREFIX);
        trace!(len, "frame out");
        Ok(len)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
