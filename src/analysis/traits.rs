//! Analysis trait definitions and data structures

use crate::model::Song;
use crate::scheduler::CancelToken;
use anyhow::Result;

/// Tempo analyzer trait - allows swapping the onset pipeline for fakes
pub trait TempoAnalyzer: Send + Sync {
    /// Estimate the tempo of a song
    ///
    /// `manual_bpm` is the tapped reference tempo, if the user entered one.
    /// Implementations poll `cancel` and return [`Analysis::Cancelled`]
    /// instead of an error when it fires.
    fn analyze(
        &self,
        song: &Song,
        manual_bpm: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<Analysis>;
}

/// Outcome of a single analysis run
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    Estimated(TempoEstimate),
    Cancelled,
}

/// Tempo estimate for a song
#[derive(Debug, Clone, PartialEq)]
pub struct TempoEstimate {
    /// Detected BPM (None when too few onsets were found)
    pub bpm: Option<f64>,

    /// Onsets kept from the complex-domain detector
    pub complex_onsets: usize,

    /// Onsets kept from the percussion detector
    pub percussion_onsets: usize,

    /// Folded candidates the BPM was chosen from
    pub candidates: usize,
}

impl TempoEstimate {
    /// Estimate with no onsets at all
    pub fn empty() -> Self {
        Self {
            bpm: None,
            complex_onsets: 0,
            percussion_onsets: 0,
            candidates: 0,
        }
    }
}
