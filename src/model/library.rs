use super::{Song, SongAnalysis, SongId};
use anyhow::{Context, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

/// File extensions picked up when scanning a directory
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac"];

/// Collection of songs indexed by id, keeping scan order
#[derive(Debug, Clone)]
pub struct Library {
    /// All songs indexed by their ID
    songs: HashMap<SongId, Song>,

    /// Insertion order
    order: Vec<SongId>,
}

impl Library {
    /// Create a new empty library
    pub fn new() -> Self {
        Self {
            songs: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Recursively collect audio files below `dir`
    pub fn scan(dir: &Path) -> Result<Self> {
        log::info!("Scanning {:?} for audio files", dir);

        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {:?}", dir);
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_audio = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_audio {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            library.add_song(Song::from_path(path));
        }

        log::info!("Found {} songs", library.song_count());
        Ok(library)
    }

    /// Add a song, replacing one with the same id
    pub fn add_song(&mut self, song: Song) {
        if self.songs.insert(song.id, song.clone()).is_none() {
            self.order.push(song.id);
        }
    }

    /// Get a song by ID
    pub fn get_song(&self, id: SongId) -> Option<&Song> {
        self.songs.get(&id)
    }

    /// Songs in scan order
    pub fn songs(&self) -> impl Iterator<Item = &Song> {
        self.order.iter().filter_map(|id| self.songs.get(id))
    }

    /// Total number of songs
    pub fn song_count(&self) -> usize {
        self.songs.len()
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

/// A song paired with its stored analysis, as shown in BPM listings
#[derive(Debug, Clone, Serialize)]
pub struct SongBpm {
    pub song: Song,
    pub analysis: Option<SongAnalysis>,
}

impl SongBpm {
    pub fn bpm(&self) -> Option<f64> {
        self.analysis.as_ref().and_then(|a| a.bpm)
    }
}

/// Ordering of BPM listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Keep library order
    Original,
    /// Slowest first, songs without BPM last
    Ascending,
    /// Fastest first, songs without BPM first
    Descending,
}

/// Sort listing rows by BPM (stable, so equal tempos keep library order)
pub fn sort_by_bpm(rows: &mut [SongBpm], order: SortOrder) {
    match order {
        SortOrder::Original => {}
        SortOrder::Ascending => rows.sort_by(|a, b| match (a.bpm(), b.bpm()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
        SortOrder::Descending => rows.sort_by(|a, b| match (a.bpm(), b.bpm()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }),
    }
}
