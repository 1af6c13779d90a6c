//! Download task persistence and clip download status.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::MetadataStore;
use crate::models::{ClipKey, DownloadStatus, DownloadTask, TaskState};
use crate::repository::{parse_datetime, parse_datetime_opt, Result, StoreError};

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<DownloadTask> {
    let state: String = row.get("state")?;
    let target: String = row.get("target_path")?;
    let created_at: String = row.get("created_at")?;
    let bytes: i64 = row.get("bytes")?;
    Ok(DownloadTask {
        id: row.get("id")?,
        clip: ClipKey::new(row.get::<_, String>("site")?, row.get::<_, String>("clip_id")?),
        target_path: PathBuf::from(target),
        template: row.get("template")?,
        state: TaskState::from_str(&state).unwrap_or(TaskState::Queued),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        cancelled: row.get::<_, i64>("cancelled")? != 0,
        bytes_transferred: bytes.max(0) as u64,
        created_at: parse_datetime(&created_at),
        started_at: parse_datetime_opt(row.get("started_at")?),
        finished_at: parse_datetime_opt(row.get("finished_at")?),
    })
}

impl MetadataStore {
    /// Insert a task, or update it if a task with the same id exists.
    pub fn save_task(&self, task: &DownloadTask) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                r#"
                INSERT INTO download_tasks (
                    id, site, clip_id, target_path, template, state, attempts,
                    last_error, cancelled, bytes, created_at, started_at, finished_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    target_path = excluded.target_path,
                    state = excluded.state,
                    attempts = excluded.attempts,
                    last_error = excluded.last_error,
                    cancelled = excluded.cancelled,
                    bytes = excluded.bytes,
                    started_at = excluded.started_at,
                    finished_at = excluded.finished_at
                "#,
                params![
                    task.id,
                    task.clip.site,
                    task.clip.clip_id,
                    task.target_path.to_string_lossy(),
                    task.template,
                    task.state.as_str(),
                    task.attempts,
                    task.last_error,
                    task.cancelled as i64,
                    task.bytes_transferred as i64,
                    task.created_at.to_rfc3339(),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.finished_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<DownloadTask>> {
        let conn = self.reader()?;
        let task = conn
            .query_row(
                "SELECT * FROM download_tasks WHERE id = ?",
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        self.write(|tx| {
            let n = tx.execute("DELETE FROM download_tasks WHERE id = ?", params![id])?;
            Ok(n > 0)
        })
    }

    /// Non-terminal task for a clip, if one exists.
    pub fn active_task_for(&self, key: &ClipKey) -> Result<Option<DownloadTask>> {
        let conn = self.reader()?;
        let task = conn
            .query_row(
                r#"
                SELECT * FROM download_tasks
                WHERE site = ? AND clip_id = ? AND state IN ('queued', 'fetching', 'converting')
                ORDER BY created_at LIMIT 1
                "#,
                params![key.site, key.clip_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Non-terminal tasks left behind by an earlier run, oldest first.
    ///
    /// Tasks interrupted mid-flight are moved back to `queued` so they are
    /// resumed from the start.
    pub fn pending_tasks(&self) -> Result<Vec<DownloadTask>> {
        self.write(|tx| {
            tx.execute(
                "UPDATE download_tasks SET state = 'queued' WHERE state IN ('fetching', 'converting')",
                [],
            )?;
            let mut stmt = tx.prepare(
                "SELECT * FROM download_tasks WHERE state = 'queued' AND cancelled = 0 ORDER BY created_at",
            )?;
            let tasks = stmt
                .query_map([], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Record a finished download on the clip row.
    pub fn mark_download_done(
        &self,
        key: &ClipKey,
        local_path: &Path,
        thumb_path: Option<&Path>,
    ) -> Result<()> {
        self.set_clip_download(
            key,
            DownloadStatus::Done,
            Some(local_path.to_string_lossy().into_owned()),
            thumb_path.map(|p| p.to_string_lossy().into_owned()),
            None,
        )
    }

    /// Record a permanently failed download on the clip row.
    pub fn mark_download_failed(&self, key: &ClipKey, error: &str) -> Result<()> {
        self.set_clip_download(key, DownloadStatus::Failed, None, None, Some(error.to_string()))
    }

    fn set_clip_download(
        &self,
        key: &ClipKey,
        status: DownloadStatus,
        local_path: Option<String>,
        thumb_path: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let downloaded_at = (status == DownloadStatus::Done).then(|| Utc::now().to_rfc3339());
        self.write(|tx| {
            let n = tx.execute(
                r#"
                UPDATE clips SET
                    dl_status = ?,
                    local_path = COALESCE(?, local_path),
                    thumb_path = COALESCE(?, thumb_path),
                    dl_error = ?,
                    downloaded_at = COALESCE(?, downloaded_at)
                WHERE site = ? AND clip_id = ?
                "#,
                params![
                    status.as_str(),
                    local_path,
                    thumb_path,
                    error,
                    downloaded_at,
                    key.site,
                    key.clip_id
                ],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "clip",
                    id: key.to_string(),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use crate::models::ClipRecord;

    #[test]
    fn test_task_upsert_and_lookup() {
        let (_dir, store) = temp_store();
        let key = ClipKey::new("Pexels", "1");
        let mut task = DownloadTask::new(key.clone(), PathBuf::from("/tmp/1.mp4"), "{site}/{id}");
        store.save_task(&task).unwrap();
        assert_eq!(store.active_task_for(&key).unwrap().unwrap().id, task.id);

        task.state = TaskState::Failed;
        task.attempts = 3;
        task.last_error = Some("HTTP 503".to_string());
        store.save_task(&task).unwrap();

        let loaded = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Failed);
        assert_eq!(loaded.attempts, 3);
        assert!(store.active_task_for(&key).unwrap().is_none());
        assert!(store.delete_task(&task.id).unwrap());
    }

    #[test]
    fn test_pending_tasks_requeue_interrupted() {
        let (_dir, store) = temp_store();
        let mut a = DownloadTask::new(ClipKey::new("Pexels", "1"), PathBuf::from("a.mp4"), "");
        a.state = TaskState::Fetching;
        let b = DownloadTask::new(ClipKey::new("Pexels", "2"), PathBuf::from("b.mp4"), "");
        let mut c = DownloadTask::new(ClipKey::new("Pexels", "3"), PathBuf::from("c.mp4"), "");
        c.state = TaskState::Done;
        for t in [&a, &b, &c] {
            store.save_task(t).unwrap();
        }
        let pending = store.pending_tasks().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|t| t.state == TaskState::Queued));
    }

    #[test]
    fn test_clip_download_status() {
        let (_dir, store) = temp_store();
        let record = ClipRecord::new("Pexels", "1");
        store.upsert_clip(&record).unwrap();
        let key = record.key();

        store.mark_download_failed(&key, "boom").unwrap();
        let clip = store.get_clip(&key).unwrap().unwrap();
        assert_eq!(clip.dl_status, DownloadStatus::Failed);
        assert_eq!(clip.dl_error.as_deref(), Some("boom"));

        store
            .mark_download_done(&key, Path::new("/lib/1.mp4"), Some(Path::new("/lib/1.jpg")))
            .unwrap();
        let clip = store.get_clip(&key).unwrap().unwrap();
        assert_eq!(clip.dl_status, DownloadStatus::Done);
        assert_eq!(clip.local_path.as_deref(), Some("/lib/1.mp4"));
        assert!(clip.dl_error.is_none());
        assert!(clip.downloaded_at.is_some());

        assert!(matches!(
            store.mark_download_failed(&ClipKey::new("Pexels", "404"), "x"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
