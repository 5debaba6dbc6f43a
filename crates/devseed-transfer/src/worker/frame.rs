//! NUL-separated frames over async byte streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Result, TransferError};

pub const SEPARATOR: u8 = 0;

/// Largest request frame a worker accepts (1 MiB).
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Read size used while scanning for the separator.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// Write `payload` followed by the separator and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.contains(&SEPARATOR) {
        return Err(TransferError::Frame(
            "payload contains the frame separator".to_string(),
        ));
    }
    writer.write_all(payload).await?;
    writer.write_all(&[SEPARATOR]).await?;
    writer.flush().await?;
    Ok(())
}

/// How a streamed frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCopy {
    /// The separator was seen after this many payload bytes.
    Complete(u64),
    /// The stream closed first; the bytes copied so far are incomplete.
    Truncated(u64),
}

/// Splits a byte stream into frames.
///
/// Bytes read past a separator are kept for the next frame.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let mut block = [0u8; BLOCK_SIZE];
        let read = self.inner.read(&mut block).await?;
        self.pending.extend_from_slice(&block[..read]);
        Ok(read)
    }

    /// Buffer the next frame whole.
    ///
    /// Returns `None` when the stream ends cleanly between frames.
    pub async fn read_frame(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        let mut scanned = 0;
        loop {
            if let Some(offset) = self.pending[scanned..]
                .iter()
                .position(|byte| *byte == SEPARATOR)
            {
                let end = scanned + offset;
                if end > max {
                    return Err(frame_too_large(max));
                }
                let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
                frame.pop();
                return Ok(Some(frame));
            }

            scanned = self.pending.len();
            if scanned > max {
                return Err(frame_too_large(max));
            }
            if self.fill().await? == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(TransferError::Frame(
                    "stream ended inside a frame".to_string(),
                ));
            }
        }
    }

    /// Stream the next frame into `out` without holding it in memory.
    pub async fn copy_frame<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> Result<FrameCopy> {
        let mut written = 0u64;
        loop {
            if let Some(end) = self.pending.iter().position(|byte| *byte == SEPARATOR) {
                out.write_all(&self.pending[..end]).await?;
                written += end as u64;
                self.pending.drain(..=end);
                out.flush().await?;
                return Ok(FrameCopy::Complete(written));
            }

            if !self.pending.is_empty() {
                out.write_all(&self.pending).await?;
                written += self.pending.len() as u64;
                self.pending.clear();
            }

            if self.fill().await? == 0 {
                out.flush().await?;
                return Ok(FrameCopy::Truncated(written));
            }
        }
    }
}

fn frame_too_large(max: usize) -> TransferError {
    TransferError::Frame(format!("frame exceeds {max} bytes"))
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn splits_frames_written_back_to_back() {
        let (mut tx, rx) = duplex(64);
        tokio::spawn(async move {
            write_frame(&mut tx, br#"{"a":1}"#).await.expect("first");
            write_frame(&mut tx, b"").await.expect("empty");
            write_frame(&mut tx, br#"{"b":2}"#).await.expect("second");
        });

        let mut reader = FrameReader::new(rx);
        assert_eq!(
            reader.read_frame(MAX_REQUEST_BYTES).await.expect("read"),
            Some(br#"{"a":1}"#.to_vec())
        );
        assert_eq!(
            reader.read_frame(MAX_REQUEST_BYTES).await.expect("read"),
            Some(Vec::new())
        );
        assert_eq!(
            reader.read_frame(MAX_REQUEST_BYTES).await.expect("read"),
            Some(br#"{"b":2}"#.to_vec())
        );
        assert_eq!(reader.read_frame(MAX_REQUEST_BYTES).await.expect("eof"), None);
    }

    #[tokio::test]
    async fn rejects_oversized_requests() {
        let payload = vec![b'x'; 64];
        let mut reader = FrameReader::new(&payload[..]);
        let err = reader.read_frame(16).await.expect_err("too large");
        assert!(err.to_string().contains("exceeds 16 bytes"));
    }

    #[tokio::test]
    async fn eof_inside_a_request_is_an_error() {
        let mut reader = FrameReader::new(&b"{\"partial\""[..]);
        assert!(reader.read_frame(MAX_REQUEST_BYTES).await.is_err());
    }

    #[tokio::test]
    async fn copies_large_frames_across_blocks() {
        let mut stream = vec![b'r'; BLOCK_SIZE * 3 + 17];
        stream.push(SEPARATOR);
        stream.extend_from_slice(b"next");
        stream.push(SEPARATOR);

        let mut reader = FrameReader::new(&stream[..]);
        let mut out = Vec::new();
        let copied = reader.copy_frame(&mut out).await.expect("copy");
        assert_eq!(copied, FrameCopy::Complete((BLOCK_SIZE * 3 + 17) as u64));
        assert_eq!(out.len(), BLOCK_SIZE * 3 + 17);

        let mut next = Vec::new();
        assert_eq!(
            reader.copy_frame(&mut next).await.expect("copy"),
            FrameCopy::Complete(4)
        );
        assert_eq!(next, b"next");
    }

    #[tokio::test]
    async fn reports_truncated_responses() {
        let mut reader = FrameReader::new(&b"[{\"type\""[..]);
        let mut out = Vec::new();
        assert_eq!(
            reader.copy_frame(&mut out).await.expect("copy"),
            FrameCopy::Truncated(8)
        );
    }

    #[tokio::test]
    async fn refuses_payloads_containing_the_separator() {
        let mut out = Vec::new();
        assert!(write_frame(&mut out, b"a\0b").await.is_err());
        assert!(out.is_empty());
    }
}
