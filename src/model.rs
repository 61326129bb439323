use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Navigation order applied by `prev`/`next`.
///
/// Stored in settings as an integer code so older or hand-edited state files
/// with an unknown value still resolve to a usable mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayMode {
    #[default]
    Loop,
    Single,
    Shuffle,
}

impl PlayMode {
    pub const LOOP_CODE: i32 = 0;
    pub const SINGLE_CODE: i32 = 1;
    pub const SHUFFLE_CODE: i32 = 2;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::SINGLE_CODE => Self::Single,
            Self::SHUFFLE_CODE => Self::Shuffle,
            _ => Self::Loop,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Loop => Self::LOOP_CODE,
            Self::Single => Self::SINGLE_CODE,
            Self::Shuffle => Self::SHUFFLE_CODE,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Loop => Self::Shuffle,
            Self::Shuffle => Self::Single,
            Self::Single => Self::Loop,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Single => "single",
            Self::Shuffle => "shuffle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "loop" => Some(Self::Loop),
            "single" | "one" => Some(Self::Single),
            "shuffle" | "random" => Some(Self::Shuffle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Preparing,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: i64,
    pub path: PathBuf,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(id: i64, path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration_ms: None,
        }
    }
}

/// Ordered track list the controller indexes into.
///
/// Only ever replaced wholesale after a rescan; there is no per-track editing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn replace(&mut self, tracks: Vec<Track>) {
        self.tracks.clear();
        self.tracks.extend(tracks);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn position_of(&self, id: i64) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    #[serde(default)]
    pub folders: Vec<PathBuf>,
    #[serde(default)]
    pub play_mode: i32,
    #[serde(default = "default_last_track_id")]
    pub last_track_id: i64,
}

pub const NO_TRACK_ID: i64 = -1;

fn default_last_track_id() -> i64 {
    NO_TRACK_ID
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            play_mode: PlayMode::LOOP_CODE,
            last_track_id: default_last_track_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_codes_fall_back_to_loop() {
        assert_eq!(PlayMode::from_code(0), PlayMode::Loop);
        assert_eq!(PlayMode::from_code(1), PlayMode::Single);
        assert_eq!(PlayMode::from_code(2), PlayMode::Shuffle);
        assert_eq!(PlayMode::from_code(-7), PlayMode::Loop);
        assert_eq!(PlayMode::from_code(42), PlayMode::Loop);
    }

    #[test]
    fn mode_cycle_visits_every_mode() {
        let mut mode = PlayMode::Loop;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(mode);
            mode = mode.next();
        }
        assert_eq!(mode, PlayMode::Loop);
        assert_eq!(seen, vec![PlayMode::Loop, PlayMode::Shuffle, PlayMode::Single]);
    }

    #[test]
    fn missing_fields_use_documented_defaults() {
        let state: PersistedState = serde_json::from_str("{}").expect("parse");
        assert_eq!(state, PersistedState::default());
        assert_eq!(state.last_track_id, NO_TRACK_ID);
        assert_eq!(PlayMode::from_code(state.play_mode), PlayMode::Loop);
    }

    #[test]
    fn replace_swaps_whole_contents() {
        let mut playlist = Playlist::new(vec![Track::new(1, "a.mp3", "a")]);
        playlist.replace(vec![Track::new(2, "b.mp3", "b"), Track::new(3, "c.mp3", "c")]);
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.position_of(1), None);
        assert_eq!(playlist.position_of(3), Some(1));
    }
}
