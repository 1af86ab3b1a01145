//! Wire format between estimation clients and the server: every message is a
//! big-endian `u32` byte length followed by that many bytes of JSON.

use super::error::EngineError;
use crate::core::models::request::EstimationRequest;
use crate::core::models::result::EstimationResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_MESSAGE_BYTES: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    Submit { request: EstimationRequest },
    Query { request_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerMessage {
    Accepted { request_id: String },
    Status { request_id: String, status: RequestStatus },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    ResourceProvisioning,
    Backend,
    Storage,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RequestStatus {
    Queued,
    Running {
        completed_tasks: usize,
        total_tasks: usize,
    },
    Completed {
        result: EstimationResult,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

impl FailureKind {
    pub fn of(error: &EngineError) -> Self {
        match error {
            EngineError::ResourceProvisioning(_) => Self::ResourceProvisioning,
            EngineError::Storage(_) => Self::Storage,
            EngineError::Backend(_) | EngineError::Io { .. } => Self::Backend,
            _ => Self::Internal,
        }
    }

    /// Maps a failure back onto the error kind that caused it on the server.
    pub fn into_error(self, message: String) -> EngineError {
        match self {
            Self::ResourceProvisioning => EngineError::ResourceProvisioning(message),
            Self::Backend => EngineError::Backend(message),
            Self::Storage => EngineError::Storage(message),
            Self::Internal => EngineError::Protocol(message),
        }
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body =
        serde_json::to_vec(message).map_err(|e| EngineError::serialization("protocol message", e))?;
    let length = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_BYTES)
        .ok_or_else(|| {
            EngineError::Protocol(format!("message of {} bytes exceeds the limit", body.len()))
        })?;
    writer
        .write_all(&length.to_be_bytes())
        .await
        .map_err(|e| EngineError::Protocol(format!("failed to send message: {}", e)))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| EngineError::Protocol(format!("failed to send message: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| EngineError::Protocol(format!("failed to send message: {}", e)))
}

/// Reads one message; `Ok(None)` means the peer closed the connection cleanly
/// before a new message started.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, EngineError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(EngineError::Protocol(format!("failed to read message: {}", e))),
    }
    let length = u32::from_be_bytes(header);
    if length > MAX_MESSAGE_BYTES {
        return Err(EngineError::Protocol(format!(
            "peer announced a {} byte message, above the limit",
            length
        )));
    }

    let mut body = vec![0u8; length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| EngineError::Protocol(format!("truncated message: {}", e)))?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| EngineError::serialization("protocol message", e))
}
