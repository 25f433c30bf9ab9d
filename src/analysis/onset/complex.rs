use super::{frame_level_db, OnsetDetector, PeakPicker, Spectrum};
use crate::model::Onset;

const PEAK_WINDOW_PRE: usize = 1;
const PEAK_WINDOW_POST: usize = 5;

/// Complex-domain onset detector
///
/// For every bin the next value is predicted from the previous magnitude
/// and a linear phase extrapolation (`2φ[n-1] - φ[n-2]`). The detection
/// function is the summed distance between the observed and predicted
/// spectra, so it reacts both to energy bursts and to pitch changes.
pub struct ComplexOnsetDetector {
    spectrum: Spectrum,
    picker: PeakPicker<(f64, bool)>,
    prev_magnitude: Vec<f64>,
    phase_1: Vec<f64>,
    phase_2: Vec<f64>,
    silence_threshold_db: f64,
    min_inter_onset_secs: f64,
    last_onset: Option<f64>,
}

impl ComplexOnsetDetector {
    pub fn new(
        buffer_size: usize,
        threshold: f64,
        min_inter_onset_secs: f64,
        silence_threshold_db: f64,
    ) -> Self {
        let bins = buffer_size / 2 + 1;
        Self {
            spectrum: Spectrum::new(buffer_size),
            picker: PeakPicker::new(PEAK_WINDOW_PRE, PEAK_WINDOW_POST, threshold),
            prev_magnitude: vec![0.0; bins],
            phase_1: vec![0.0; bins],
            phase_2: vec![0.0; bins],
            silence_threshold_db,
            min_inter_onset_secs,
            last_onset: None,
        }
    }

    /// Detection-function value for one frame, updating the phase history
    fn detection_value(&mut self, frame: &[f32]) -> f64 {
        let bins = self.spectrum.transform(frame);
        let mut sum = 0.0;

        for (j, bin) in bins.iter().enumerate() {
            let magnitude = bin.norm() as f64;
            let phase = bin.arg() as f64;

            let predicted = 2.0 * self.phase_1[j] - self.phase_2[j];
            let prev = self.prev_magnitude[j];
            let distance_sq = prev * prev + magnitude * magnitude
                - 2.0 * prev * magnitude * (phase - predicted).cos();
            sum += distance_sq.abs().sqrt();

            self.phase_2[j] = self.phase_1[j];
            self.phase_1[j] = phase;
            self.prev_magnitude[j] = magnitude;
        }

        sum
    }

    fn accept(&mut self, salience: f64, timestamp: f64, silent: bool) -> Option<Onset> {
        if silent {
            return None;
        }
        if let Some(last) = self.last_onset {
            if timestamp - last < self.min_inter_onset_secs {
                return None;
            }
        }
        self.last_onset = Some(timestamp);
        Some(Onset::new(timestamp, salience))
    }
}

impl OnsetDetector for ComplexOnsetDetector {
    fn process(&mut self, frame: &[f32], timestamp: f64) -> Option<Onset> {
        let silent = frame_level_db(frame) < self.silence_threshold_db;
        let value = self.detection_value(frame);

        let (salience, (peak_time, peak_silent)) = self.picker.push(value, (timestamp, silent))?;
        self.accept(salience, peak_time, peak_silent)
    }

    fn finish(&mut self) -> Vec<Onset> {
        let mut onsets = Vec::new();
        for (salience, (time, silent)) in self.picker.flush() {
            if let Some(onset) = self.accept(salience, time, silent) {
                onsets.push(onset);
            }
        }
        onsets
    }
}
