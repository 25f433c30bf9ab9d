//! Audio analysis layer
//!
//! Tempo estimation is exposed through the [`TempoAnalyzer`] trait so the
//! scheduler can run the real onset pipeline or a fake in tests.
//!
//! The real pipeline decodes with symphonia, low-passes the signal, runs a
//! complex-domain and a percussion onset detector over the same frames and
//! folds their inter-onset intervals into a single BPM.

pub mod aggregate;
mod decoder;
mod export;
mod filter;
pub mod onset;
mod real;
mod tap;
mod traits;

pub use aggregate::{fold_bpm, TempoWindow};
pub use decoder::{decode_mono, resample_linear, Frames};
pub use export::export_filtered_audio;
pub use filter::LowPassFilter;
pub use real::OnsetTempoAnalyzer;
pub use tap::TapTempo;
pub use traits::{Analysis, TempoAnalyzer, TempoEstimate};
