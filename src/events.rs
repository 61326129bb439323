//! Messages crossing into and out of the owner context.
//!
//! Inbound: renderer signals and finished rescans, queued on the controller's
//! mailbox. Outbound: listener notifications, either through a
//! [`PlayerListener`] implementation or forwarded as [`PlayerEvent`] values.

use crate::error::PlayerError;
use crate::model::{PlaybackState, Track};
use std::sync::mpsc::Sender;

/// Identifies one `play(track)` attempt. Renderer signals carry the session
/// they belong to so signals from an orphaned prepare can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Session(u64);

impl Session {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    Prepared(Session),
    Completed(Session),
    BufferingUpdate(Session, u8),
    Error(Session, String),
}

impl RendererEvent {
    pub fn session(&self) -> Session {
        match self {
            Self::Prepared(session)
            | Self::Completed(session)
            | Self::BufferingUpdate(session, _)
            | Self::Error(session, _) => *session,
        }
    }
}

pub type ScanCallback = Box<dyn FnOnce(usize) + Send>;

pub enum Inbound {
    Renderer(RendererEvent),
    ScanFinished {
        tracks: Vec<Track>,
        on_done: Option<ScanCallback>,
    },
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Renderer(event) => f.debug_tuple("Renderer").field(event).finish(),
            Self::ScanFinished { tracks, on_done } => f
                .debug_struct("ScanFinished")
                .field("tracks", &tracks.len())
                .field("has_callback", &on_done.is_some())
                .finish(),
        }
    }
}

/// Push notifications from the controller, delivered on the owner context.
pub trait PlayerListener {
    fn on_player_start(&mut self);
    fn on_player_pause(&mut self);
    fn on_change(&mut self, track: &Track);

    fn on_load_failed(&mut self, _track: &Track, _error: &PlayerError) {}

    fn on_playlist_updated(&mut self, _len: usize) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Started,
    Paused,
    Changed(Track),
    LoadFailed { track: Track, error: PlayerError },
    PlaylistUpdated(usize),
}

/// Snapshot of controller state handed across the owner boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub cursor: Option<usize>,
    pub track: Option<Track>,
    pub position_ms: u64,
    pub playlist_len: usize,
    pub play_mode: crate::model::PlayMode,
}

/// Forwards every notification as a [`PlayerEvent`] over a channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<PlayerEvent>,
}

impl ChannelListener {
    pub fn new(tx: Sender<PlayerEvent>) -> Self {
        Self { tx }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}

impl PlayerListener for ChannelListener {
    fn on_player_start(&mut self) {
        self.emit(PlayerEvent::Started);
    }

    fn on_player_pause(&mut self) {
        self.emit(PlayerEvent::Paused);
    }

    fn on_change(&mut self, track: &Track) {
        self.emit(PlayerEvent::Changed(track.clone()));
    }

    fn on_load_failed(&mut self, track: &Track, error: &PlayerError) {
        self.emit(PlayerEvent::LoadFailed {
            track: track.clone(),
            error: error.clone(),
        });
    }

    fn on_playlist_updated(&mut self, len: usize) {
        self.emit(PlayerEvent::PlaylistUpdated(len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn channel_listener_forwards_in_order() {
        let (tx, rx) = mpsc::channel();
        let mut listener = ChannelListener::new(tx);
        let track = Track::new(3, "c.mp3", "c");

        listener.on_change(&track);
        listener.on_player_start();
        listener.on_player_pause();

        let events: Vec<PlayerEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PlayerEvent::Changed(track),
                PlayerEvent::Started,
                PlayerEvent::Paused
            ]
        );
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut listener = ChannelListener::new(tx);
        listener.on_player_start();
    }

    #[test]
    fn sessions_advance() {
        let first = Session::default();
        let second = first.next();
        assert_ne!(first, second);
        assert_eq!(RendererEvent::Completed(second).session(), second);
    }
}
