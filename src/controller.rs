//! Playback state machine and playlist navigation.
//!
//! Everything here runs on a single owner context. Renderer signals and rescan
//! results are queued on the controller's mailbox and applied by [`pump`];
//! nothing is mutated from another thread.
//!
//! [`pump`]: PlaybackController::pump

use crate::audio::{EventSink, Renderer, RendererFactory};
use crate::config::Settings;
use crate::error::PlayerError;
use crate::events::{Inbound, PlayerListener, PlayerSnapshot, RendererEvent, ScanCallback, Session};
use crate::library::Scanner;
use crate::model::{PlayMode, PlaybackState, Playlist, Track};
use crate::service::Command;
use rand::prelude::*;
use rand::rngs::SmallRng;
use std::sync::{Arc, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Prev,
    Next,
}

pub struct PlaybackController {
    playlist: Playlist,
    cursor: Option<usize>,
    playing: Option<Track>,
    state: PlaybackState,
    session: Session,
    renderer: Option<Box<dyn Renderer>>,
    renderer_factory: RendererFactory,
    settings: Box<dyn Settings>,
    listener: Option<Box<dyn PlayerListener>>,
    scanner: Option<Arc<dyn Scanner>>,
    inbox_tx: Sender<Inbound>,
    inbox_rx: Receiver<Inbound>,
    shuffle_rng: SmallRng,
}

impl PlaybackController {
    pub fn new(
        playlist: Playlist,
        settings: Box<dyn Settings>,
        renderer_factory: RendererFactory,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Self {
            playlist,
            cursor: None,
            playing: None,
            state: PlaybackState::Idle,
            session: Session::default(),
            renderer: None,
            renderer_factory,
            settings,
            listener: None,
            scanner: None,
            inbox_tx,
            inbox_rx,
            shuffle_rng: rand::make_rng::<SmallRng>(),
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Mailbox for signals that must be applied on the owner context.
    pub fn mailbox(&self) -> Sender<Inbound> {
        self.inbox_tx.clone()
    }

    pub fn set_listener(&mut self, listener: Box<dyn PlayerListener>) {
        self.listener = Some(listener);
    }

    pub fn listener(&self) -> Option<&dyn PlayerListener> {
        self.listener.as_deref()
    }

    pub fn clear_listener(&mut self) -> Option<Box<dyn PlayerListener>> {
        self.listener.take()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_pausing(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    pub fn is_preparing(&self) -> bool {
        self.state == PlaybackState::Preparing
    }

    pub fn is_default(&self) -> bool {
        self.state == PlaybackState::Idle
    }

    pub fn playing_position(&self) -> Option<usize> {
        self.cursor
    }

    pub fn playing_track(&self) -> Option<&Track> {
        self.playing.as_ref()
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Playback position in milliseconds; 0 unless playing or paused.
    pub fn current_position_ms(&self) -> u64 {
        if !(self.is_playing() || self.is_pausing()) {
            return 0;
        }
        self.renderer
            .as_ref()
            .map(|renderer| u64::try_from(renderer.position().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Read from settings on every call so a mode change applies to the very
    /// next navigation.
    pub fn play_mode(&self) -> PlayMode {
        PlayMode::from_code(self.settings.play_mode_code())
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        info!(mode = mode.label(), "play mode changed");
        self.settings.set_play_mode_code(mode.code());
    }

    pub fn cycle_play_mode(&mut self) -> PlayMode {
        let mode = self.play_mode().next();
        self.set_play_mode(mode);
        mode
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state,
            cursor: self.cursor,
            track: self.playing.clone(),
            position_ms: self.current_position_ms(),
            playlist_len: self.playlist.len(),
            play_mode: self.play_mode(),
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        debug!(?command, "command received");
        match command {
            Command::Prev => self.prev(),
            Command::Next => self.next(),
            Command::PlayPause => self.play_pause(),
            Command::Play(position) => self.play_index(position),
            Command::Stop => self.stop(),
            Command::CycleMode => {
                self.cycle_play_mode();
            }
            Command::SetMode(mode) => self.set_play_mode(mode),
            Command::Rescan => self.update_music_list(None),
        }
    }

    /// Toggle used by a single play/pause control.
    pub fn play_pause(&mut self) {
        match self.state {
            PlaybackState::Preparing => self.stop(),
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.start(),
            PlaybackState::Idle => self.play_index(self.cursor_index()),
        }
    }

    pub fn prev(&mut self) {
        self.navigate(Step::Prev);
    }

    pub fn next(&mut self) {
        self.navigate(Step::Next);
    }

    fn navigate(&mut self, step: Step) {
        if self.playlist.is_empty() {
            trace!(?step, "navigation ignored, playlist empty");
            return;
        }

        let target = self.step_target(step);
        debug!(?step, mode = self.play_mode().label(), target, "navigating");
        self.play_index(target);
    }

    fn step_target(&mut self, step: Step) -> i64 {
        let len = self.playlist.len();
        let last = len as i64 - 1;
        let current = self.cursor_index();

        match self.play_mode() {
            PlayMode::Shuffle => self.shuffle_rng.random_range(0..len) as i64,
            PlayMode::Single => current,
            PlayMode::Loop => match step {
                // Wraps to the last track. Passing `len` here would be
                // normalized by `play_index` to the first track instead.
                Step::Prev if current != 0 => current - 1,
                Step::Prev => last,
                Step::Next if current != last => current + 1,
                Step::Next => 0,
            },
        }
    }

    fn cursor_index(&self) -> i64 {
        self.cursor.map_or(-1, |cursor| cursor as i64)
    }

    /// Plays the track at `position`, wrapping negatives to the last track and
    /// anything past the end to the first. No-op on an empty playlist.
    pub fn play_index(&mut self, position: i64) {
        if self.playlist.is_empty() {
            trace!(position, "play ignored, playlist empty");
            return;
        }

        let len = self.playlist.len();
        let index = if position < 0 {
            len - 1
        } else {
            usize::try_from(position)
                .ok()
                .filter(|index| *index < len)
                .unwrap_or(0)
        };

        self.cursor = Some(index);
        let Some(track) = self.playlist.get(index).cloned() else {
            return;
        };
        self.settings.set_last_track_id(track.id);
        self.play_track(track);
    }

    pub fn play_track(&mut self, track: Track) {
        self.playing = Some(track.clone());
        self.session = self.session.next();
        let session = self.session;

        if self.renderer.is_none() {
            let events = EventSink::new(self.inbox_tx.clone());
            match (self.renderer_factory)(events) {
                Ok(renderer) => {
                    debug!("renderer created");
                    self.renderer = Some(renderer);
                }
                Err(err) => {
                    self.fail_load(
                        &track,
                        PlayerError::RendererUnavailable(format!("{err:#}")),
                    );
                    return;
                }
            }
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        renderer.reset();
        if let Err(err) = renderer.set_source(&track.path) {
            self.fail_load(
                &track,
                PlayerError::Load {
                    path: track.path.clone(),
                    message: format!("{err:#}"),
                },
            );
            return;
        }
        renderer.prepare_async(session);
        self.state = PlaybackState::Preparing;
        info!(id = track.id, title = %track.title, session = session.id(), "preparing track");

        if let Some(listener) = self.listener.as_mut() {
            listener.on_change(&track);
        }
    }

    /// Legal only from `Preparing` or `Paused`; ignored otherwise.
    pub fn start(&mut self) {
        if !(self.is_preparing() || self.is_pausing()) {
            trace!(state = ?self.state, "start ignored");
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        renderer.start();
        self.state = PlaybackState::Playing;
        debug!("playing");
        if let Some(listener) = self.listener.as_mut() {
            listener.on_player_start();
        }
    }

    pub fn pause(&mut self) {
        if self.is_default() {
            trace!("pause ignored, idle");
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        renderer.pause();
        self.state = PlaybackState::Paused;
        debug!("paused");
        if let Some(listener) = self.listener.as_mut() {
            listener.on_player_pause();
        }
    }

    pub fn stop(&mut self) {
        if self.is_default() {
            return;
        }
        self.pause();
        self.halt();
        debug!("stopped");
    }

    /// Resets the renderer and opens a new session so signals already queued
    /// for the old one are dropped.
    fn halt(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.reset();
        }
        self.state = PlaybackState::Idle;
        self.session = self.session.next();
    }

    fn fail_load(&mut self, track: &Track, error: PlayerError) {
        warn!(id = track.id, "load failed: {error}");
        self.halt();
        if let Some(listener) = self.listener.as_mut() {
            listener.on_load_failed(track, &error);
        }
    }

    pub fn handle_renderer_event(&mut self, event: RendererEvent) {
        if event.session() != self.session {
            debug!(?event, current = self.session.id(), "stale renderer event dropped");
            return;
        }

        match event {
            RendererEvent::Prepared(_) => {
                if self.is_preparing() {
                    self.start();
                }
            }
            RendererEvent::Completed(_) => {
                debug!("track completed");
                self.next();
            }
            RendererEvent::BufferingUpdate(_, percent) => {
                trace!(percent, "buffering");
            }
            RendererEvent::Error(_, message) => {
                if self.is_default() {
                    return;
                }
                if let Some(track) = self.playing.clone() {
                    self.fail_load(&track, PlayerError::Renderer(message));
                } else {
                    self.state = PlaybackState::Idle;
                }
            }
        }
    }

    /// Applies everything queued on the mailbox. Returns how many messages
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            handled += 1;
            match inbound {
                Inbound::Renderer(event) => self.handle_renderer_event(event),
                Inbound::ScanFinished { tracks, on_done } => self.finish_rescan(tracks, on_done),
            }
        }
        handled
    }

    /// Lets the renderer detect end of stream, then applies queued signals.
    pub fn tick(&mut self) -> usize {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.tick();
        }
        self.pump()
    }

    /// Re-derives the cursor from the persisted last-track id after a rescan.
    ///
    /// Falls back to index 0 when the id is absent or no longer present, then
    /// persists the id of whatever track the cursor resolved to.
    pub fn update_playing_position(&mut self) {
        if self.playlist.is_empty() {
            return;
        }

        let id = self.settings.last_track_id();
        let position = self.playlist.position_of(id).unwrap_or(0);
        self.cursor = Some(position);
        if let Some(track) = self.playlist.get(position) {
            self.settings.set_last_track_id(track.id);
        }
        debug!(id, position, "playing position reconciled");
    }

    /// Rescans on a worker thread and applies the result on the owner
    /// context at the next [`pump`](Self::pump). Playback is not interrupted.
    pub fn update_music_list(&mut self, on_done: Option<ScanCallback>) {
        let Some(scanner) = self.scanner.clone() else {
            warn!("rescan requested without a scanner");
            if let Some(on_done) = on_done {
                on_done(self.playlist.len());
            }
            return;
        };

        let mailbox = self.inbox_tx.clone();
        let pending = Arc::new(Mutex::new(on_done));
        let worker_pending = Arc::clone(&pending);
        let worker_scanner = Arc::clone(&scanner);
        let spawned = thread::Builder::new()
            .name(String::from("library-scan"))
            .spawn(move || {
                let tracks = worker_scanner.scan();
                let on_done = take_pending(&worker_pending);
                let _ = mailbox.send(Inbound::ScanFinished { tracks, on_done });
            });
        match spawned {
            Ok(_) => info!("library scan started"),
            Err(err) => {
                // The closure never ran, so the callback is still in the slot.
                warn!("failed to start library scan, scanning inline: {err}");
                self.scan_inline(scanner.as_ref(), take_pending(&pending));
            }
        }
    }

    fn scan_inline(&mut self, scanner: &dyn Scanner, on_done: Option<ScanCallback>) {
        let tracks = scanner.scan();
        self.finish_rescan(tracks, on_done);
    }

    /// Replaces the playlist with a finished scan and reconciles the cursor.
    pub fn finish_rescan(&mut self, tracks: Vec<Track>, on_done: Option<ScanCallback>) {
        self.playlist.replace(tracks);
        let len = self.playlist.len();

        if self.playlist.is_empty() {
            self.cursor = None;
        } else {
            self.update_playing_position();
            self.playing = self
                .cursor
                .and_then(|cursor| self.playlist.get(cursor))
                .cloned();
        }
        info!(tracks = len, cursor = ?self.cursor, "playlist updated");

        if let Some(listener) = self.listener.as_mut() {
            listener.on_playlist_updated(len);
        }
        if let Some(on_done) = on_done {
            on_done(len);
        }
    }

    /// Stops playback and releases the renderer. The controller stays usable;
    /// a later `play` builds a fresh renderer.
    ///
    /// Listeners are not told about the implied pause.
    pub fn release(&mut self) {
        if !self.is_default() {
            self.halt();
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release();
            info!("renderer released");
        }
    }
}

fn take_pending(slot: &Mutex<Option<ScanCallback>>) -> Option<ScanCallback> {
    slot.lock().ok().and_then(|mut pending| pending.take())
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.release();
    }
}
