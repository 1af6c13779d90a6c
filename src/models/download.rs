//! Download task models.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clip::ClipKey;

/// Identifier of a download task.
pub type TaskId = String;

/// State machine of a download task.
///
/// `Queued -> Fetching -> (Converting) -> Done | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Fetching,
    Converting,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Converting => "converting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "fetching" => Some(Self::Fetching),
            "converting" => Some(Self::Converting),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A persistent download task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: TaskId,
    pub clip: ClipKey,
    pub target_path: PathBuf,
    pub template: String,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub cancelled: bool,
    pub bytes_transferred: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadTask {
    pub fn new(clip: ClipKey, target_path: PathBuf, template: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            clip,
            target_path,
            template: template.into(),
            state: TaskState::Queued,
            attempts: 0,
            last_error: None,
            cancelled: false,
            bytes_transferred: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
