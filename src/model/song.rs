use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable song identifier
///
/// Ids derived from paths are always positive so they fit SQLite `INTEGER`
/// and never collide with the "no song" sentinel of older databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub i64);

impl SongId {
    /// Derive an id from a file path (first 8 bytes of its MD5 digest)
    pub fn from_path(path: &Path) -> Self {
        let digest = md5::compute(path.to_string_lossy().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.0[..8]);
        let id = i64::from_be_bytes(bytes) & i64::MAX;
        // 0 is reserved
        SongId(id.max(1))
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A song that can be analyzed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Unique identifier
    pub id: SongId,

    /// Display title (file stem when no tags are read)
    pub title: String,

    /// Path to the audio file
    pub path: PathBuf,
}

impl Song {
    /// Create a song for a local file, deriving id and title from the path
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            id: SongId::from_path(&path),
            title,
            path,
        }
    }

    /// Create a song from a `file://` URI or a plain path
    ///
    /// Returns None for URIs with another scheme or broken percent-encoding.
    pub fn from_uri(uri: &str) -> Option<Self> {
        if let Some(rest) = uri.strip_prefix("file://") {
            let decoded = urlencoding::decode(rest).ok()?;
            Some(Self::from_path(PathBuf::from(decoded.into_owned())))
        } else if uri.contains("://") {
            None
        } else {
            Some(Self::from_path(PathBuf::from(uri)))
        }
    }

    /// Use an explicit id instead of the path-derived one
    pub fn with_id(mut self, id: SongId) -> Self {
        self.id = id;
        self
    }
}

/// Persisted analysis data for one song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongAnalysis {
    pub song_id: SongId,

    /// Detected tempo (None when too few onsets were found)
    pub bpm: Option<f64>,

    /// Tempo entered by tapping, used as octave-correction reference
    pub manual_bpm: Option<f64>,

    /// When the last automatic analysis completed
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl SongAnalysis {
    pub fn new(song_id: SongId) -> Self {
        Self {
            song_id,
            bpm: None,
            manual_bpm: None,
            analyzed_at: None,
        }
    }

    /// Whether an automatic analysis has completed for this song
    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }
}

/// A detected transient
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Onset {
    /// Position in seconds from the start of the audio
    pub timestamp: f64,

    /// Detector-specific strength of the onset
    pub salience: f64,
}

impl Onset {
    pub fn new(timestamp: f64, salience: f64) -> Self {
        Self {
            timestamp,
            salience,
        }
    }
}
