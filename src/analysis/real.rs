//! Onset-based tempo analyzer
//!
//! Decodes the song, low-passes it, runs both onset detectors over the
//! same frames and aggregates their inter-onset intervals into a BPM.

use super::aggregate::{aggregate, TempoWindow};
use super::decoder::{decode_mono, Frames};
use super::filter::LowPassFilter;
use super::onset::{ComplexOnsetDetector, OnsetDetector, PercussionOnsetDetector};
use super::traits::{Analysis, TempoAnalyzer, TempoEstimate};
use crate::config::AnalyzerConfig;
use crate::model::{Onset, Song};
use crate::scheduler::CancelToken;
use anyhow::{Context, Result};

/// Real analyzer: decoder -> low-pass -> complex + percussion detectors -> aggregator
pub struct OnsetTempoAnalyzer {
    config: AnalyzerConfig,
}

impl OnsetTempoAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let mut config = config;
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Run the detectors over already-decoded mono samples at the analysis rate
    ///
    /// The samples are filtered in place.
    pub fn analyze_samples(
        &self,
        samples: &mut [f32],
        manual_bpm: Option<f64>,
        cancel: &CancelToken,
    ) -> Analysis {
        let config = &self.config;

        LowPassFilter::new(config.low_pass_hz, config.sample_rate as f32).process(samples);

        let mut complex = ComplexOnsetDetector::new(
            config.buffer_size,
            config.complex_threshold,
            config.min_inter_onset_secs,
            config.silence_threshold_db,
        );
        let mut percussion = PercussionOnsetDetector::new(
            config.buffer_size,
            config.percussion_sensitivity,
            config.percussion_threshold_db,
        );

        let mut complex_times = Vec::new();
        let mut percussion_times = Vec::new();
        let min_salience = config.min_salience;
        let keep = |onset: Onset, times: &mut Vec<f64>| {
            if onset.salience > min_salience {
                times.push(onset.timestamp);
            }
        };

        let mut frames = Frames::new(
            samples,
            config.buffer_size,
            config.hop_size,
            config.sample_rate,
        );
        while let Some((timestamp, frame)) = frames.next_frame() {
            if cancel.is_cancelled() {
                return Analysis::Cancelled;
            }
            if let Some(onset) = complex.process(frame, timestamp) {
                keep(onset, &mut complex_times);
            }
            if let Some(onset) = percussion.process(frame, timestamp) {
                keep(onset, &mut percussion_times);
            }
        }
        for onset in complex.finish() {
            keep(onset, &mut complex_times);
        }
        for onset in percussion.finish() {
            keep(onset, &mut percussion_times);
        }

        let window = TempoWindow::for_song(config, manual_bpm);
        let result = aggregate(&complex_times, &percussion_times, window, config.aggregation);

        Analysis::Estimated(TempoEstimate {
            bpm: result.bpm,
            complex_onsets: complex_times.len(),
            percussion_onsets: percussion_times.len(),
            candidates: result.candidates,
        })
    }
}

impl Default for OnsetTempoAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl TempoAnalyzer for OnsetTempoAnalyzer {
    fn analyze(
        &self,
        song: &Song,
        manual_bpm: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<Analysis> {
        log::debug!("Analyzing: {:?}", song.path);

        let decoded = decode_mono(
            &song.path,
            self.config.sample_rate,
            self.config.max_duration_secs,
            cancel,
        )
        .with_context(|| format!("Failed to decode {:?}", song.path))?;

        let mut samples = match decoded {
            Some(samples) => samples,
            None => return Ok(Analysis::Cancelled),
        };

        let analysis = self.analyze_samples(&mut samples, manual_bpm, cancel);

        if let Analysis::Estimated(ref estimate) = analysis {
            match estimate.bpm {
                Some(bpm) => log::info!(
                    "BPM detected: {:.1} from {} candidates ({} complex, {} percussion) for {}",
                    bpm,
                    estimate.candidates,
                    estimate.complex_onsets,
                    estimate.percussion_onsets,
                    song.title
                ),
                None => log::info!("Too few onsets to estimate BPM for {}", song.title),
            }
        }

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, seconds: f64, sample_rate: u32) -> Vec<f32> {
        let len = (seconds * sample_rate as f64) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; len];
        let mut pos = period / 4;
        while pos < len {
            samples[pos] = 0.9;
            pos += period;
        }
        samples
    }

    #[test]
    fn test_analysis_requires_file() {
        let analyzer = OnsetTempoAnalyzer::default();
        let song = Song::from_path("/nonexistent/file.mp3");
        assert!(analyzer.analyze(&song, None, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_silence_gives_no_bpm() {
        let analyzer = OnsetTempoAnalyzer::default();
        let mut samples = vec![0.0f32; 44_100 * 3];

        match analyzer.analyze_samples(&mut samples, None, &CancelToken::new()) {
            Analysis::Estimated(estimate) => {
                assert_eq!(estimate.bpm, None);
                assert_eq!(estimate.candidates, 0);
            }
            Analysis::Cancelled => panic!("not cancelled"),
        }
    }

    #[test]
    fn test_cancelled_token_stops_analysis() {
        let analyzer = OnsetTempoAnalyzer::default();
        let mut samples = click_track(120.0, 5.0, 44_100);
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            analyzer.analyze_samples(&mut samples, None, &cancel),
            Analysis::Cancelled
        );
    }

    fn run_analysis(samples: &mut [f32], manual_bpm: Option<f64>) -> TempoEstimate {
        let analyzer = OnsetTempoAnalyzer::default();
        match analyzer.analyze_samples(samples, manual_bpm, &CancelToken::new()) {
            Analysis::Estimated(estimate) => estimate,
            Analysis::Cancelled => panic!("not cancelled"),
        }
    }

    #[test]
    fn test_click_track_tempo_is_recovered() {
        for bpm in [120.0, 140.0] {
            let mut samples = click_track(bpm, 20.0, 44_100);
            let estimate = run_analysis(&mut samples, None);

            let detected = estimate.bpm.expect("clicks should produce a tempo");
            assert!((detected - bpm).abs() <= 1.0, "{} detected as {}", bpm, detected);
        }
    }

    #[test]
    fn test_one_complex_onset_per_click() {
        let mut samples = click_track(120.0, 20.0, 44_100);
        let estimate = run_analysis(&mut samples, None);

        // 40 clicks in 20 seconds; doubled onsets would give about 80
        assert!(
            (20..=42).contains(&estimate.complex_onsets),
            "{} complex onsets",
            estimate.complex_onsets
        );
    }

    #[test]
    fn test_manual_reference_constrains_result() {
        let mut samples = click_track(120.0, 20.0, 44_100);
        let estimate = run_analysis(&mut samples, Some(60.0));

        let bpm = estimate.bpm.expect("the reference window should keep candidates");
        assert!((bpm - 60.0).abs() <= 1.0, "detected {}", bpm);
    }
}
