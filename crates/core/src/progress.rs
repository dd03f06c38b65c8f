//! Progress reporting types shared by the notifier, the durable progress
//! record and the HTTP surface.

use crate::upload::{UploadPhase, UploadResult};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Progress value recorded when an upload failed. Terminal.
pub const FAILED_PROGRESS: i32 = -1;

/// Completed progress value.
pub const COMPLETE_PROGRESS: i32 = 100;

/// Last known progress of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// 0..=100, or [`FAILED_PROGRESS`].
    pub progress: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProgressState {
    pub fn is_failed(&self) -> bool {
        self.progress == FAILED_PROGRESS
    }

    /// Whether moving to `next` is allowed: progress never decreases and
    /// nothing follows a failure.
    pub fn accepts(&self, next: i32) -> bool {
        if self.is_failed() {
            return false;
        }
        next == FAILED_PROGRESS || next > self.progress
    }
}

/// Events pushed to listeners of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { progress: i32 },
    Result(UploadResult),
    Error { error: String },
}

impl ProgressEvent {
    /// Channel event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Result(_) => "result",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Progress { progress } => *progress == FAILED_PROGRESS,
            Self::Result(_) | Self::Error { .. } => true,
        }
    }
}

/// Poll response for a session. Safe to request repeatedly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// 0..=100, or -1 once the upload failed.
    pub progress: i32,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub is_complete: bool,
    pub phase: UploadPhase,
    pub has_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
