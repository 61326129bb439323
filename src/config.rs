use crate::model::PersistedState;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_DIR: &str = "nowplaying";
const STATE_FILE: &str = "state.json";

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("NOWPLAYING_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATE_FILE))
}

pub fn load_state_from(path: &Path) -> Result<PersistedState> {
    if !path.exists() {
        return Ok(PersistedState::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let state: PersistedState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    Ok(state)
}

pub fn save_state_to(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

/// Durable scalar settings read by navigation and written by track selection.
///
/// Reads never fail: every value has a default so a missing or unreadable
/// store cannot abort a playback operation.
pub trait Settings {
    fn play_mode_code(&self) -> i32;
    fn set_play_mode_code(&mut self, code: i32);
    fn last_track_id(&self) -> i64;
    fn set_last_track_id(&mut self, id: i64);
    fn folders(&self) -> Vec<PathBuf>;
    fn set_folders(&mut self, folders: Vec<PathBuf>);
}

/// Settings backed by `state.json`, written through on every change.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    state: PersistedState,
}

impl FileSettings {
    pub fn open() -> Result<Self> {
        Self::at(state_path()?)
    }

    pub fn at(path: PathBuf) -> Result<Self> {
        let state = load_state_from(&path)?;
        debug!(path = %path.display(), "loaded settings");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) {
        if let Err(err) = save_state_to(&self.path, &self.state) {
            warn!("settings not persisted: {err:#}");
        }
    }
}

impl Settings for FileSettings {
    fn play_mode_code(&self) -> i32 {
        self.state.play_mode
    }

    fn set_play_mode_code(&mut self, code: i32) {
        self.state.play_mode = code;
        self.persist();
    }

    fn last_track_id(&self) -> i64 {
        self.state.last_track_id
    }

    fn set_last_track_id(&mut self, id: i64) {
        if self.state.last_track_id == id {
            return;
        }
        self.state.last_track_id = id;
        self.persist();
    }

    fn folders(&self) -> Vec<PathBuf> {
        self.state.folders.clone()
    }

    fn set_folders(&mut self, folders: Vec<PathBuf>) {
        self.state.folders = folders;
        self.persist();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    state: PersistedState,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_play_mode_code(mut self, code: i32) -> Self {
        self.state.play_mode = code;
        self
    }

    pub fn with_last_track_id(mut self, id: i64) -> Self {
        self.state.last_track_id = id;
        self
    }
}

impl Settings for MemorySettings {
    fn play_mode_code(&self) -> i32 {
        self.state.play_mode
    }

    fn set_play_mode_code(&mut self, code: i32) {
        self.state.play_mode = code;
    }

    fn last_track_id(&self) -> i64 {
        self.state.last_track_id
    }

    fn set_last_track_id(&mut self, id: i64) {
        self.state.last_track_id = id;
    }

    fn folders(&self) -> Vec<PathBuf> {
        self.state.folders.clone()
    }

    fn set_folders(&mut self, folders: Vec<PathBuf>) {
        self.state.folders = folders;
    }
}
