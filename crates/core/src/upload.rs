//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

const MAX_FILE_ID_LEN: usize = 128;

/// Client supplied identifier of one upload attempt.
///
/// Restricted to `[A-Za-z0-9_-]` so it can be embedded in storage keys.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_FILE_ID_LEN {
            return Err(crate::Error::InvalidFileId(format!(
                "length must be 1..={MAX_FILE_ID_LEN}"
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(crate::Error::InvalidFileId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<FileId> for String {
    fn from(value: FileId) -> Self {
        value.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting chunks.
    Receiving,
    /// A finalize attempt owns the session.
    Finalizing,
    /// The last finalize attempt failed in a way that must not be retried.
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiving => "receiving",
            Self::Finalizing => "finalizing",
            Self::Failed => "failed",
        }
    }

    /// Check if the session can still take chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Receiving)
    }
}

impl FromStr for SessionState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "receiving" => Ok(Self::Receiving),
            "finalizing" => Ok(Self::Finalizing),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible phase of an upload.
///
/// `Created` and `ReadyToFinalize` are derived from the chunk count;
/// `Completed` is observed once the session is gone and a result exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Created,
    Receiving,
    ReadyToFinalize,
    Finalizing,
    Completed,
    Failed,
}

impl UploadPhase {
    /// Derive the phase of a live session.
    pub fn of(state: SessionState, received: u32, total: u32) -> Self {
        match state {
            SessionState::Failed => Self::Failed,
            SessionState::Finalizing => Self::Finalizing,
            SessionState::Receiving if received == 0 => Self::Created,
            SessionState::Receiving if received >= total => Self::ReadyToFinalize,
            SessionState::Receiving => Self::Receiving,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Bookkeeping for one in-progress upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    pub file_id: FileId,
    /// Sanitized file name.
    pub file_name: String,
    pub file_type: String,
    /// Expected total bytes.
    pub file_size: u64,
    pub total_chunks: u32,
    pub state: SessionState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last chunk activity.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Indices in `0..total_chunks` absent from `received`, ascending.
    ///
    /// `received` must be sorted ascending.
    pub fn missing_indices(&self, received: &[u32]) -> Vec<u32> {
        let mut missing = Vec::new();
        let mut iter = received.iter().peekable();
        for index in 0..self.total_chunks {
            while iter.next_if(|&&r| r < index).is_some() {}
            if iter.next_if_eq(&&index).is_none() {
                missing.push(index);
            }
        }
        missing
    }

    pub fn phase(&self, received: u32) -> UploadPhase {
        UploadPhase::of(self.state, received, self.total_chunks)
    }
}

/// Percentage of chunks received, rounded half up.
pub fn chunk_progress(received: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let received = u64::from(received.min(total));
    let total = u64::from(total);
    ((received * 200 + total) / (total * 2)) as u8
}

/// Metadata accompanying every chunk of an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSubmission {
    pub total_chunks: u32,
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    pub file_size: u64,
}

/// Acknowledgement of a chunk submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub is_complete: bool,
    pub progress: u8,
    /// True when this submission was a retry of an already recorded index.
    #[serde(default)]
    pub duplicate: bool,
}

/// Finalize request. Name, type and size default to the session's values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    /// One of `1h`, `1d`, `7d`, `30d`.
    #[serde(default)]
    pub expires: Option<String>,
    /// Requested public domain; must be on the allow-list.
    #[serde(default)]
    pub domain: Option<String>,
}

/// A completed, publicly resolvable upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub slug: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub url: String,
    pub public_url: String,
    pub domain: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub completed: bool,
}
