//! Rolling-window transfer speed and ETA.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default averaging window.
pub const WINDOW: Duration = Duration::from_secs(5);

/// Speed over the last few seconds of byte samples.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    total: u64,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(WINDOW)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            total: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&mut self, at: Instant, bytes: u64) {
        self.total += bytes;
        self.samples.push_back((at, bytes));
        while let Some(&(t, _)) = self.samples.front() {
            if at.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes recorded since creation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes per second over the window.
    pub fn speed(&self) -> f64 {
        let (Some(&(first, _)), Some(&(last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let span = last.duration_since(first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        // The first sample marks the start of the span.
        let bytes: u64 = self.samples.iter().skip(1).map(|(_, b)| b).sum();
        bytes as f64 / span
    }

    /// Time left for `total` bytes at the current speed.
    pub fn eta(&self, total: Option<u64>) -> Option<Duration> {
        let total = total?;
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.total) as f64;
        Some(Duration::from_secs_f64(remaining / speed))
    }
}

/// ETA from media-time progress: wall time so far scaled by the fraction
/// of the clip still to come.
pub fn eta_from_position(elapsed: Duration, position: Duration, total: Duration) -> Option<Duration> {
    if position.is_zero() || total.is_zero() || position >= total {
        return None;
    }
    let done = position.as_secs_f64() / total.as_secs_f64();
    Some(Duration::from_secs_f64(elapsed.as_secs_f64() * (1.0 - done) / done))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_over_window() {
        let mut m = ThroughputMeter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        m.record_at(t0, 1000);
        m.record_at(t0 + Duration::from_secs(1), 1000);
        m.record_at(t0 + Duration::from_secs(2), 1000);
        assert!((m.speed() - 1000.0).abs() < 1e-6);
        assert_eq!(m.total(), 3000);
        assert_eq!(m.eta(Some(8000)), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_old_samples_drop_out() {
        let mut m = ThroughputMeter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        m.record_at(t0, 100_000);
        m.record_at(t0 + Duration::from_secs(10), 10);
        m.record_at(t0 + Duration::from_secs(11), 10);
        assert!((m.speed() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_eta_from_position() {
        let eta = eta_from_position(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::from_secs(20),
        );
        assert_eq!(eta, Some(Duration::from_secs(30)));
        assert_eq!(eta_from_position(Duration::from_secs(1), Duration::ZERO, Duration::from_secs(5)), None);
    }
}
