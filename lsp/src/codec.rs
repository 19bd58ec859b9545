//! Content-Length framing over the server's standard streams.
//!
//! Messages are framed as `Content-Length: N\r\n\r\n{json}`. [`MessageReader`]
//! and [`MessageWriter`] handle one direction each; the session pairs them over
//! the child's stdout/stdin.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (8 MiB). Reference results for a large
/// workspace fit comfortably; anything bigger is a misbehaving server.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame header: {0}")]
    Header(String),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads framed JSON messages from the server's output stream.
pub struct MessageReader<R> {
    stream: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read the next message. `Ok(None)` means the stream ended cleanly
    /// between frames; EOF anywhere inside a frame is an error.
    pub async fn next_message(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(body_len) = self.read_header_block().await? else {
            return Ok(None);
        };

        if body_len > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized(body_len));
        }

        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Consume header lines up to the blank separator and return the declared
    /// body length, or `None` on EOF before any header byte.
    async fn read_header_block(&mut self) -> Result<Option<usize>, CodecError> {
        let mut body_len = None;
        let mut line = String::new();
        let mut in_block = false;

        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                if in_block {
                    return Err(CodecError::Header(
                        "stream ended inside a header block".to_string(),
                    ));
                }
                return Ok(None);
            }
            in_block = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; anything other
            // than Content-Length (e.g. Content-Type) is skipped.
            if let Some((name, value)) = trimmed.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    CodecError::Header(format!("unparseable Content-Length {:?}", value.trim()))
                })?;
                body_len = Some(parsed);
            }
        }

        body_len
            .map(Some)
            .ok_or_else(|| CodecError::Header("no Content-Length header".to_string()))
    }
}

/// Writes framed JSON messages to the server's input stream.
pub struct MessageWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
