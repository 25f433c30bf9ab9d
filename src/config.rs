//! Analyzer configuration
//!
//! Every tunable of the BPM pipeline and the batch scheduler lives here.
//! Configuration can be stored as YAML; missing fields fall back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for the scheduler's permit pool
pub const MAX_CONCURRENT_LIMIT: usize = 32;

/// How the final BPM is chosen from the folded candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Most frequent candidate after rounding to 0.1 BPM
    Mode,
    /// Median candidate
    Median,
}

/// Configuration for BPM analysis and batch scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Target analysis sample rate (decoded audio is resampled to it)
    pub sample_rate: u32,

    /// Analysis frame length in samples
    pub buffer_size: usize,

    /// Frame advance in samples
    pub hop_size: usize,

    /// Cutoff of the low-pass pre-filter in Hz
    pub low_pass_hz: f32,

    /// Onsets with salience at or below this value are dropped
    pub min_salience: f64,

    /// Peak-picker threshold of the complex-domain detector
    pub complex_threshold: f64,

    /// Refractory period of the complex-domain detector in seconds
    pub min_inter_onset_secs: f64,

    /// Frames quieter than this (dBFS) never produce onsets
    pub silence_threshold_db: f64,

    /// Percussion detector sensitivity (0-100)
    pub percussion_sensitivity: f64,

    /// Per-bin energy rise (dB) counted by the percussion detector
    pub percussion_threshold_db: f64,

    /// Lower bound of the plausible tempo window
    pub min_bpm: f64,

    /// Upper bound of the plausible tempo window
    pub max_bpm: f64,

    /// Width of the window around a manual reference tempo
    pub reliable_range: f64,

    /// Candidate aggregation strategy
    pub aggregation: Aggregation,

    /// Only analyze the first N seconds of a song (None = whole song)
    pub max_duration_secs: Option<f32>,

    /// Number of songs analyzed concurrently
    pub max_concurrent: usize,

    /// Number of taps averaged by the tap-tempo estimator
    pub tap_window: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 1024,
            hop_size: 512,
            low_pass_hz: 300.0,
            min_salience: 0.5,
            complex_threshold: 0.3,
            min_inter_onset_secs: 0.03,
            silence_threshold_db: -70.0,
            percussion_sensitivity: 95.0,
            percussion_threshold_db: 10.0,
            min_bpm: 60.0,
            max_bpm: 240.0,
            reliable_range: 15.0,
            aggregation: Aggregation::Mode,
            max_duration_secs: None,
            max_concurrent: 10,
            tap_window: 100,
        }
    }
}

impl AnalyzerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plausible tempo window used when no manual reference exists
    pub fn with_bpm_range(mut self, min: f64, max: f64) -> Self {
        self.min_bpm = min;
        self.max_bpm = max;
        self.validate();
        self
    }

    /// Set the number of songs analyzed at once
    pub fn with_max_concurrent(mut self, jobs: usize) -> Self {
        self.max_concurrent = jobs;
        self.validate();
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Limit how much of each song is decoded
    pub fn with_max_duration(mut self, secs: Option<f32>) -> Self {
        self.max_duration_secs = secs;
        self.validate();
        self
    }

    /// Clamp values that would make the pipeline misbehave
    pub fn validate(&mut self) {
        let defaults = Self::default();

        if self.sample_rate == 0 {
            self.sample_rate = defaults.sample_rate;
        }
        if self.buffer_size < 2 {
            self.buffer_size = defaults.buffer_size;
        }
        if self.hop_size == 0 || self.hop_size > self.buffer_size {
            self.hop_size = (self.buffer_size / 2).max(1);
        }
        if !(self.low_pass_hz > 0.0) {
            self.low_pass_hz = defaults.low_pass_hz;
        }
        self.percussion_sensitivity = self.percussion_sensitivity.clamp(0.0, 100.0);

        // Octave folding needs max >= 2 * min to always have a landing spot
        if !(self.min_bpm > 0.0) {
            self.min_bpm = defaults.min_bpm;
        }
        if self.max_bpm < self.min_bpm * 2.0 {
            self.max_bpm = self.min_bpm * 2.0;
        }
        if !(self.reliable_range > 0.0) {
            self.reliable_range = defaults.reliable_range;
        }

        if let Some(secs) = self.max_duration_secs {
            if !(secs > 0.0) {
                self.max_duration_secs = None;
            }
        }

        self.max_concurrent = self.max_concurrent.clamp(1, MAX_CONCURRENT_LIMIT);
        self.tap_window = self.tap_window.max(1);
    }
}

/// Load configuration from a YAML file
///
/// A missing or unparsable file yields the defaults.
pub fn load_config(path: &Path) -> AnalyzerConfig {
    log::debug!("Loading config from {:?}", path);

    if !path.exists() {
        log::info!("Config file {:?} not found, using defaults", path);
        return AnalyzerConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<AnalyzerConfig>(&contents) {
            Ok(mut config) => {
                config.validate();
                log::info!(
                    "Loaded config: BPM window {}-{}, {} concurrent jobs",
                    config.min_bpm,
                    config.max_bpm,
                    config.max_concurrent
                );
                config
            }
            Err(e) => {
                log::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                AnalyzerConfig::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read config {:?}: {}, using defaults", path, e);
            AnalyzerConfig::default()
        }
    }
}

/// Save configuration as YAML, creating parent directories
pub fn save_config(config: &AnalyzerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Config saved to {:?}", path);
    Ok(())
}
