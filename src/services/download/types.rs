//! Download service types and events.

use std::path::PathBuf;
use std::time::Duration;

use crate::models::{ClipKey, TaskId};
use crate::repository::StoreError;

/// Errors of a download task.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Network or conversion failure; retried with backoff.
    #[error("{url}: {reason}")]
    Transient { url: String, reason: String },

    /// Invalid output path or unsupported format; not retried.
    #[error("{entity}: {reason}")]
    Fatal { entity: String, reason: String },

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DownloadError {
    pub fn transient(url: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn fatal(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Events emitted by the download manager.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Queued {
        task: TaskId,
        clip: ClipKey,
        target: PathBuf,
    },
    Started {
        task: TaskId,
        clip: ClipKey,
        attempt: u32,
    },
    Progress {
        task: TaskId,
        bytes: u64,
        total: Option<u64>,
        speed_bps: f64,
        eta: Option<Duration>,
    },
    Converting {
        task: TaskId,
        /// Media time muxed so far.
        position: Duration,
        total: Option<Duration>,
        eta: Option<Duration>,
    },
    Retrying {
        task: TaskId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Completed {
        task: TaskId,
        clip: ClipKey,
        path: PathBuf,
        /// The file was already on disk.
        existing: bool,
    },
    Failed {
        task: TaskId,
        clip: ClipKey,
        error: String,
        cancelled: bool,
    },
}

impl DownloadEvent {
    pub fn task(&self) -> &str {
        match self {
            Self::Queued { task, .. }
            | Self::Started { task, .. }
            | Self::Progress { task, .. }
            | Self::Converting { task, .. }
            | Self::Retrying { task, .. }
            | Self::Completed { task, .. }
            | Self::Failed { task, .. } => task,
        }
    }
}

/// Why a clip was not queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NoVideoUrl,
    AlreadyDownloaded,
    AlreadyQueued,
}

/// Result of [`super::DownloadManager::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueResult {
    pub queued: Vec<TaskId>,
    pub skipped: Vec<(String, SkipReason)>,
}
