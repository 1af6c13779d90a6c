//! JSON metadata written beside each downloaded clip.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Clip;

#[derive(Debug, Serialize)]
pub struct Sidecar<'a> {
    pub clip_id: &'a str,
    pub site: &'a str,
    pub title: &'a str,
    pub creator: &'a str,
    pub collection: &'a str,
    pub tags: &'a [String],
    pub resolution: &'a str,
    pub duration: &'a str,
    pub frame_rate: &'a str,
    pub camera: &'a str,
    pub formats: Vec<&'a str>,
    pub video_url: &'a str,
    pub source_url: &'a str,
    pub local_path: String,
    pub downloaded_at: DateTime<Utc>,
}

impl<'a> Sidecar<'a> {
    pub fn new(clip: &'a Clip, local_path: &Path, downloaded_at: DateTime<Utc>) -> Self {
        Self {
            clip_id: &clip.key.clip_id,
            site: &clip.key.site,
            title: &clip.title,
            creator: &clip.creator,
            collection: &clip.collection,
            tags: &clip.tags,
            resolution: &clip.resolution,
            duration: &clip.duration,
            frame_rate: &clip.frame_rate,
            camera: &clip.camera,
            formats: clip.available_formats.iter().map(String::as_str).collect(),
            video_url: &clip.video_url,
            source_url: &clip.source_url,
            local_path: local_path.display().to_string(),
            downloaded_at,
        }
    }
}

/// Write the sidecar for `clip` to `path`.
pub async fn write_sidecar(
    path: &Path,
    clip: &Clip,
    local_path: &Path,
    downloaded_at: DateTime<Utc>,
) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(&Sidecar::new(clip, local_path, downloaded_at))
        .map_err(std::io::Error::other)?;
    tokio::fs::write(path, json).await
}
