//! Low-pass pre-filter
//!
//! Attenuates everything above the cutoff so the onset detectors react to
//! kick and bass transients rather than hi-hats and vocals.

use std::f64::consts::PI;

/// Values below this are flushed to zero to keep silent tails exact
const DENORMAL_FLOOR: f32 = 1e-20;

/// Single-pole recursive low-pass filter
///
/// `y[n] = (1 - x) * in[n] + x * y[n - 1]` with `x = exp(-2π fc / fs)`.
/// State carries across calls so a signal can be filtered block by block.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    a0: f32,
    b1: f32,
    state: f32,
}

impl LowPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let x = (-2.0 * PI * cutoff_hz as f64 / sample_rate as f64).exp() as f32;
        Self {
            a0: 1.0 - x,
            b1: x,
            state: 0.0,
        }
    }

    /// Filter a block in place
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let mut y = self.a0 * *sample + self.b1 * self.state;
            if y.abs() < DENORMAL_FLOOR {
                y = 0.0;
            }
            self.state = y;
            *sample = y;
        }
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_passes_bass_attenuates_treble() {
        let sr = 44_100.0;

        let mut bass = sine(50.0, sr, 44_100);
        LowPassFilter::new(300.0, sr).process(&mut bass);

        let mut treble = sine(5_000.0, sr, 44_100);
        LowPassFilter::new(300.0, sr).process(&mut treble);

        // Skip the settling time before measuring
        assert!(peak(&bass[4410..]) > 0.9);
        assert!(peak(&treble[4410..]) < 0.1);
    }

    #[test]
    fn test_blockwise_matches_single_pass() {
        let sr = 44_100.0;
        let signal = sine(220.0, sr, 2048);

        let mut whole = signal.clone();
        LowPassFilter::new(300.0, sr).process(&mut whole);

        let mut blocks = signal;
        let mut filter = LowPassFilter::new(300.0, sr);
        for chunk in blocks.chunks_mut(300) {
            filter.process(chunk);
        }

        assert_eq!(whole, blocks);
    }

    #[test]
    fn test_silence_decays_to_exact_zero() {
        let mut filter = LowPassFilter::new(300.0, 44_100.0);
        let mut signal = vec![0.0f32; 8192];
        signal[0] = 1.0;
        filter.process(&mut signal);

        assert_eq!(*signal.last().unwrap(), 0.0);
    }
}
