//! Errors surfaced to listeners.
//!
//! Invalid-state and empty-playlist calls are silent no-ops and never produce
//! one of these.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// The source could not be opened or decoded.
    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// No renderer could be created for this host.
    #[error("renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The renderer reported a decode or playback failure.
    #[error("renderer error: {0}")]
    Renderer(String),
}
