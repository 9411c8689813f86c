use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    at: Instant,
    rows: usize,
}

/// Rows-per-second over a sliding time window.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedMetrics {
    window: Duration,
    samples: VecDeque<Sample>,
    rows_per_second: f64,
    last_update: Option<Instant>,
}

impl Default for SpeedMetrics {
    fn default() -> Self {
        Self::with_window(DEFAULT_SPEED_WINDOW)
    }
}

impl SpeedMetrics {
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            rows_per_second: 0.0,
            last_update: None,
        }
    }

    pub fn record(&mut self, now: Instant, rows: usize) {
        self.samples.push_back(Sample { at: now, rows });
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let span = self
            .samples
            .front()
            .map(|oldest| now.saturating_duration_since(oldest.at).as_secs_f64())
            .unwrap_or(0.0);
        let total: usize = self.samples.iter().map(|sample| sample.rows).sum();
        self.rows_per_second = if span > 0.0 { total as f64 / span } else { 0.0 };
        self.last_update = Some(now);
    }

    pub fn rows_per_second(&self) -> f64 {
        self.rows_per_second
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_has_zero_rate() {
        let mut speed = SpeedMetrics::default();
        speed.record(Instant::now(), 100);
        assert_eq!(speed.rows_per_second(), 0.0);
    }

    #[test]
    fn rate_is_sum_over_span() {
        let start = Instant::now();
        let mut speed = SpeedMetrics::default();
        speed.record(start, 100);
        speed.record(start + Duration::from_secs(1), 100);
        speed.record(start + Duration::from_secs(2), 100);
        assert!((speed.rows_per_second() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn samples_outside_window_are_dropped() {
        let start = Instant::now();
        let mut speed = SpeedMetrics::with_window(Duration::from_secs(5));
        speed.record(start, 10_000);
        speed.record(start + Duration::from_secs(8), 10);
        speed.record(start + Duration::from_secs(10), 10);
        // Only the last two samples remain: 20 rows over 2 seconds.
        assert!((speed.rows_per_second() - 10.0).abs() < 1e-9);
        assert_eq!(speed.last_update(), Some(start + Duration::from_secs(10)));
    }
}
