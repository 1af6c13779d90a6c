//! ffmpeg discovery and invocation for stream conversion and thumbnails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// `out_time_us=` / `out_time_ms=` lines of `-progress pipe:1` (both are
/// microseconds).
static OUT_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_[mu]s=(\d+)").expect("valid regex"));

/// Upper bound for a thumbnail extraction.
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a conversion that was not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    Completed,
    Cancelled,
}

/// A located ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: PathBuf,
}

impl Ffmpeg {
    /// Use `explicit` if given, otherwise search PATH.
    pub fn locate(explicit: Option<&Path>) -> Option<Self> {
        if let Some(path) = explicit {
            if path.exists() {
                return Some(Self {
                    path: path.to_path_buf(),
                });
            }
            warn!("Configured ffmpeg not found at {}", path.display());
        }
        which::which("ffmpeg").ok().map(|path| Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch the segments of a stream manifest and mux them into `output`.
    ///
    /// `progress` receives the media time written so far. On cancellation
    /// the process is killed; the caller removes the partial file.
    pub async fn convert(
        &self,
        input_url: &str,
        output: &Path,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(Duration) + Send),
    ) -> Result<ConvertOutcome> {
        let mut cmd = Command::new(&self.path);
        cmd.args([
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-protocol_whitelist",
            "file,http,https,tcp,tls,crypto,hls",
            "-i",
            input_url,
            "-c:v",
            "copy",
            "-an",
            "-movflags",
            "+faststart",
            "-progress",
            "pipe:1",
            "-nostats",
            "-f",
            "mp4",
        ])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!("Running ffmpeg for {} -> {}", input_url, output.display());
        let mut child = cmd.spawn().context("Failed to execute ffmpeg")?;
        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        let mut stderr = child.stderr.take().context("ffmpeg stderr not captured")?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Ok(ConvertOutcome::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(us) = OUT_TIME
                            .captures(line.trim())
                            .and_then(|c| c[1].parse::<u64>().ok())
                        {
                            progress(Duration::from_micros(us));
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Ok(ConvertOutcome::Cancelled);
            }
            status = child.wait() => status.context("Failed waiting for ffmpeg")?,
        };
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            anyhow::bail!("ffmpeg exited with {}: {}", status, detail);
        }
        let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            anyhow::bail!("ffmpeg produced no output");
        }
        Ok(ConvertOutcome::Completed)
    }

    /// Write one representative frame of `video` to `output` (JPEG).
    pub async fn thumbnail(&self, video: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-ss", "3", "-i"])
            .arg(video)
            .args(["-frames:v", "1", "-vf", "thumbnail,scale=320:-1", "-q:v", "3"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(THUMBNAIL_TIMEOUT, cmd.output())
            .await
            .context("ffmpeg thumbnail timed out")?
            .context("Failed to execute ffmpeg")?;
        if !result.status.success() {
            anyhow::bail!(
                "ffmpeg thumbnail failed: {}",
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        if !output.exists() {
            anyhow::bail!("ffmpeg wrote no thumbnail");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_time_parsing() {
        let caps = OUT_TIME.captures("out_time_us=12500000").unwrap();
        assert_eq!(&caps[1], "12500000");
        assert!(OUT_TIME.captures("out_time=00:00:12.500000").is_none());
    }

    #[test]
    fn test_missing_explicit_path_falls_back_to_search() {
        let missing = Path::new("/nonexistent/bin/ffmpeg");
        let found = Ffmpeg::locate(Some(missing));
        if let Some(ff) = found {
            assert_ne!(ff.path(), missing);
        }
    }
}
