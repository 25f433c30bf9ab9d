//! Manual tap-tempo estimator
//!
//! Each tap contributes `60000 / Δt_ms`; the estimate is the moving average
//! over the last N contributions. The result is stored as a song's manual
//! BPM and narrows the octave-correction window of the next analysis.

use std::time::Instant;

/// Moving-average tap tempo over a fixed-size ring buffer
#[derive(Debug, Clone)]
pub struct TapTempo {
    ring: Vec<f64>,
    next: usize,
    filled: usize,
    sum: f64,
    last_tap_ms: Option<i64>,
    last_interval_ms: Option<i64>,
    epoch: Instant,
}

impl TapTempo {
    /// `window` is the number of taps averaged (at least 1)
    pub fn new(window: usize) -> Self {
        Self {
            ring: vec![0.0; window.max(1)],
            next: 0,
            filled: 0,
            sum: 0.0,
            last_tap_ms: None,
            last_interval_ms: None,
            epoch: Instant::now(),
        }
    }

    /// Register a tap now, using a monotonic clock
    pub fn tap(&mut self) -> Option<f64> {
        let now_ms = self.epoch.elapsed().as_millis() as i64;
        self.tap_at(now_ms)
    }

    /// Register a tap at `time_ms`; returns the updated average
    ///
    /// A non-positive delta (first tap, clock moved backwards, double
    /// event) only records the time and returns None.
    pub fn tap_at(&mut self, time_ms: i64) -> Option<f64> {
        let previous = self.last_tap_ms.replace(time_ms);
        let delta = time_ms - previous?;
        if delta <= 0 {
            return None;
        }

        let bpm = 60_000.0 / delta as f64;
        self.sum += bpm - self.ring[self.next];
        self.ring[self.next] = bpm;
        self.next = (self.next + 1) % self.ring.len();
        self.filled = (self.filled + 1).min(self.ring.len());
        self.last_interval_ms = Some(delta);

        self.average()
    }

    /// Current moving average, None before the second tap
    pub fn average(&self) -> Option<f64> {
        if self.filled == 0 {
            None
        } else {
            Some(self.sum / self.filled as f64)
        }
    }

    /// Interval between the last two taps, e.g. to drive a metronome
    pub fn interval_ms(&self) -> Option<i64> {
        self.last_interval_ms
    }

    /// Number of intervals in the average
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Forget all taps
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.next = 0;
        self.filled = 0;
        self.sum = 0.0;
        self.last_tap_ms = None;
        self.last_interval_ms = None;
    }
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new(100)
    }
}
