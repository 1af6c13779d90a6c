//! Media transfer: direct HTTP streams and manifest conversion.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use super::types::DownloadError;
use crate::services::ffmpeg::{ConvertOutcome, Ffmpeg};

/// A response body read chunk by chunk.
#[async_trait]
pub trait MediaStream: Send {
    fn content_length(&self) -> Option<u64>;

    /// Next chunk, or `None` at the end of the body.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError>;
}

/// Source of media bytes for the download workers.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Start a direct transfer of `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn MediaStream>, DownloadError>;

    /// Fetch and mux a segmented stream into `output`.
    async fn convert(
        &self,
        url: &str,
        output: &Path,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(Duration) + Send),
    ) -> Result<ConvertOutcome, DownloadError>;

    /// Extract a thumbnail frame of `video` into `output`.
    async fn thumbnail(&self, video: &Path, output: &Path) -> Result<(), DownloadError>;
}

/// reqwest for direct files, ffmpeg for manifests and thumbnails.
pub struct HttpFetcher {
    client: Client,
    ffmpeg: Option<Ffmpeg>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, proxy: Option<&str>, ffmpeg: Option<Ffmpeg>) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .gzip(false)
            .brotli(false);
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            ffmpeg,
        })
    }

    fn ffmpeg(&self, entity: &str) -> Result<&Ffmpeg, DownloadError> {
        self.ffmpeg
            .as_ref()
            .ok_or_else(|| DownloadError::fatal(entity, "ffmpeg not found in PATH"))
    }
}

fn classify_status(url: &str, status: StatusCode) -> DownloadError {
    let reason = format!("HTTP {}", status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        DownloadError::transient(url, reason)
    } else {
        DownloadError::fatal(url, reason)
    }
}

struct HttpStream {
    url: String,
    response: Response,
}

#[async_trait]
impl MediaStream for HttpStream {
    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
        self.response
            .chunk()
            .await
            .map(|c| c.map(|b| b.to_vec()))
            .map_err(|e| DownloadError::transient(&self.url, e.to_string()))
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn open(&self, url: &str) -> Result<Box<dyn MediaStream>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::transient(url, e.to_string()))?;
        if !response.status().is_success() {
            return Err(classify_status(url, response.status()));
        }
        Ok(Box::new(HttpStream {
            url: url.to_string(),
            response,
        }))
    }

    async fn convert(
        &self,
        url: &str,
        output: &Path,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(Duration) + Send),
    ) -> Result<ConvertOutcome, DownloadError> {
        self.ffmpeg(url)?
            .convert(url, output, cancel, progress)
            .await
            .map_err(|e| DownloadError::transient(url, format!("{:#}", e)))
    }

    async fn thumbnail(&self, video: &Path, output: &Path) -> Result<(), DownloadError> {
        let entity = video.display().to_string();
        self.ffmpeg(&entity)?
            .thumbnail(video, output)
            .await
            .map_err(|e| DownloadError::fatal(entity, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let url = "https://cdn.example.com/a.mp4";
        assert!(classify_status(url, StatusCode::BAD_GATEWAY).is_retryable());
        assert!(classify_status(url, StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!classify_status(url, StatusCode::NOT_FOUND).is_retryable());
        assert!(!classify_status(url, StatusCode::FORBIDDEN).is_retryable());
    }
}
