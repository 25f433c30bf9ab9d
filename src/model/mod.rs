//! Data model shared by the analysis pipeline, the store and the scheduler

mod library;
mod song;

pub use library::{sort_by_bpm, Library, SongBpm, SortOrder, AUDIO_EXTENSIONS};
pub use song::{Onset, Song, SongAnalysis, SongId};
