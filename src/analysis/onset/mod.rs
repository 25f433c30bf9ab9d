//! Onset detection
//!
//! Two detectors run side by side over the same low-passed frames:
//! a complex-domain detector that reacts to changes in both magnitude and
//! phase, and a percussion detector that counts bins with a sudden energy
//! rise. Each reports [`Onset`]s with its own notion of salience.

mod complex;
mod peak_picker;
mod percussion;

pub use complex::ComplexOnsetDetector;
pub use peak_picker::PeakPicker;
pub use percussion::PercussionOnsetDetector;

use crate::model::Onset;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Frame-by-frame onset detector
pub trait OnsetDetector {
    /// Feed one frame starting at `timestamp` seconds
    fn process(&mut self, frame: &[f32], timestamp: f64) -> Option<Onset>;

    /// Flush onsets still held back by look-ahead
    fn finish(&mut self) -> Vec<Onset> {
        Vec::new()
    }
}

/// Windowed forward FFT shared by both detectors
pub(crate) struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl Spectrum {
    pub(crate) fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);

        let window: Vec<f32> = (0..size)
            .map(|i| {
                let t = i as f32 / (size - 1).max(1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); size],
        }
    }

    /// Transform a frame; returns the non-negative frequency half
    pub(crate) fn transform(&mut self, frame: &[f32]) -> &[Complex<f32>] {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        // Short frames are zero-padded
        for slot in self.buffer.iter_mut().skip(frame.len()) {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft.process(&mut self.buffer);
        &self.buffer[..self.buffer.len() / 2 + 1]
    }
}

/// Frame loudness in dBFS (RMS); silent frames give negative infinity
pub(crate) fn frame_level_db(frame: &[f32]) -> f64 {
    if frame.is_empty() {
        return f64::NEG_INFINITY;
    }
    let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (energy / frame.len() as f64).sqrt();
    20.0 * rms.log10()
}
