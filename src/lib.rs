//! BPM Analyzer - tempo detection for a local music library
//!
//! This library estimates the tempo of audio files with onset detection,
//! corrects octave errors, persists results in SQLite and runs batch
//! analysis with bounded concurrency and cancellation.

pub mod analysis;
pub mod config;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;

pub use analysis::{OnsetTempoAnalyzer, TapTempo, TempoAnalyzer};
pub use config::AnalyzerConfig;
pub use scheduler::BatchScheduler;
pub use store::SongAnalysisStore;
