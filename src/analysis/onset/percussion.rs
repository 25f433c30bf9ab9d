use super::{OnsetDetector, Spectrum};
use crate::model::Onset;

/// Percussive onset detector
///
/// Counts the frequency bins whose magnitude rose by at least
/// `threshold_db` since the previous frame. A percussive hit lights up
/// many bins at once, so an onset is reported for the frame whose count is
/// a local peak above a sensitivity-derived minimum.
pub struct PercussionOnsetDetector {
    spectrum: Spectrum,
    prior_magnitude: Vec<f32>,
    threshold_db: f64,
    min_bins: f64,
    df_minus_1: usize,
    df_minus_2: usize,
    prev_timestamp: f64,
}

impl PercussionOnsetDetector {
    /// `sensitivity` is 0-100; higher values need fewer rising bins
    pub fn new(buffer_size: usize, sensitivity: f64, threshold_db: f64) -> Self {
        let sensitivity = sensitivity.clamp(0.0, 100.0);
        Self {
            spectrum: Spectrum::new(buffer_size),
            prior_magnitude: vec![0.0; buffer_size / 2],
            threshold_db,
            min_bins: (100.0 - sensitivity) * buffer_size as f64 / 200.0,
            df_minus_1: 0,
            df_minus_2: 0,
            prev_timestamp: 0.0,
        }
    }

    fn rising_bins(&mut self, frame: &[f32]) -> usize {
        let bins = self.spectrum.transform(frame);
        let mut count = 0;

        for (prior, bin) in self.prior_magnitude.iter_mut().zip(bins) {
            let magnitude = bin.norm();
            if *prior > 0.0 {
                let rise = 10.0 * ((magnitude / *prior) as f64).log10();
                if rise >= self.threshold_db {
                    count += 1;
                }
            }
            *prior = magnitude;
        }

        count
    }

    fn salience(&self, count: usize) -> f64 {
        if self.min_bins > 0.0 {
            count as f64 / self.min_bins
        } else {
            count as f64
        }
    }
}

impl OnsetDetector for PercussionOnsetDetector {
    fn process(&mut self, frame: &[f32], timestamp: f64) -> Option<Onset> {
        let count = self.rising_bins(frame);

        let is_peak = self.df_minus_2 < self.df_minus_1
            && self.df_minus_1 >= count
            && self.df_minus_1 as f64 > self.min_bins;

        let onset = is_peak
            .then(|| Onset::new(self.prev_timestamp, self.salience(self.df_minus_1)));

        self.df_minus_2 = self.df_minus_1;
        self.df_minus_1 = count;
        self.prev_timestamp = timestamp;

        onset
    }

    fn finish(&mut self) -> Vec<Onset> {
        let is_peak = self.df_minus_2 < self.df_minus_1 && self.df_minus_1 as f64 > self.min_bins;
        let onset = is_peak
            .then(|| Onset::new(self.prev_timestamp, self.salience(self.df_minus_1)));
        self.df_minus_2 = 0;
        self.df_minus_1 = 0;
        onset.into_iter().collect()
    }
}
