//! Wire format between clients and the leader endpoint.
//!
//! One JSON document per line. JSON escapes newlines inside strings, so a
//! `\n` byte always ends a frame and the stream needs no length prefix.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ApiError;

/// Largest accepted frame, including the trailing newline.
pub const MAX_FRAME_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Get {
        key: String,
    },
    CompareAndSwap {
        key: String,
        old: String,
        new: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Answer to [`Request::Get`].
    Value { value: String },
    /// Answer to [`Request::CompareAndSwap`]: the value seen before the call.
    Swap { value: String, swapped: bool },
    /// The request could not be processed. The endpoint hangs up after this.
    Error { message: String },
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ApiError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let read = match reader.take(MAX_FRAME_BYTES).read_line(&mut line).await {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(ApiError::Protocol("frame is not valid UTF-8".to_string()));
        }
        Err(e) => return Err(ApiError::Transport(e)),
    };

    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(if read as u64 >= MAX_FRAME_BYTES {
            ApiError::Protocol(format!("frame exceeds {} bytes", MAX_FRAME_BYTES))
        } else {
            ApiError::Protocol("connection closed mid-frame".to_string())
        });
    }

    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| ApiError::Protocol(format!("malformed frame: {}", e)))
}

/// Write one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ApiError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| ApiError::Protocol(format!("failed to encode frame: {}", e)))?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
