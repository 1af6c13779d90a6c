//! Aggregate bandwidth cap shared by all download workers.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Largest chunk a worker may claim at once.
pub const MAX_CHUNK: usize = 16 * 1024;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket refilled at `rate` bytes per second.
///
/// Waiters are served in arrival order: the bucket sits behind a fair
/// mutex that is held while a waiter sleeps for its share, so a worker
/// asking for a chunk cannot be overtaken by a later one. The bucket
/// starts empty and holds at most one chunk, keeping bursts small.
#[derive(Debug)]
pub struct BandwidthLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl BandwidthLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            rate: bytes_per_sec.max(1) as f64,
            capacity: MAX_CHUNK as f64,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last: Instant::now(),
            }),
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.rate as u64
    }

    /// Wait until `bytes` may be transferred.
    pub async fn acquire(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let need = bytes as f64;
        let mut bucket = self.bucket.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity.max(need));
        bucket.last = now;

        if bucket.tokens < need {
            let wait = (need - bucket.tokens) / self.rate;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last).as_secs_f64();
            bucket.tokens += elapsed * self.rate;
            bucket.last = now;
        }
        bucket.tokens = (bucket.tokens - need).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_single_worker_is_throttled() {
        let limiter = BandwidthLimiter::new(64 * 1024);
        let started = std::time::Instant::now();
        for _ in 0..4 {
            limiter.acquire(MAX_CHUNK).await;
        }
        // 64 KiB at 64 KiB/s from an empty bucket.
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_shared_across_workers() {
        let limiter = Arc::new(BandwidthLimiter::new(128 * 1024));
        let started = std::time::Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..3 {
                    limiter.acquire(MAX_CHUNK).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // 144 KiB total at 128 KiB/s.
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}
