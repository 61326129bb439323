use crate::audio::RendererFactory;
use crate::config::Settings;
use crate::controller::PlaybackController;
use crate::events::{PlayerListener, PlayerSnapshot, ScanCallback};
use crate::library::Scanner;
use crate::model::{PlayMode, Playlist};
use anyhow::Context;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Host intents accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Prev,
    Next,
    PlayPause,
    Play(i64),
    Stop,
    CycleMode,
    SetMode(PlayMode),
    Rescan,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        let mut words = input.split_whitespace();
        let head = words.next().unwrap_or(" ");
        let command = match head.to_ascii_lowercase().as_str() {
            "n" | "next" => Self::Next,
            "p" | "prev" => Self::Prev,
            " " | "pp" | "toggle" => Self::PlayPause,
            "s" | "stop" => Self::Stop,
            "m" | "mode" => match words.next() {
                Some(value) => Self::SetMode(PlayMode::parse(value)?),
                None => Self::CycleMode,
            },
            "r" | "rescan" => Self::Rescan,
            "play" => Self::Play(words.next()?.parse().ok()?),
            _ => return None,
        };
        Some(command)
    }
}

enum ServiceMessage {
    Command(Command),
    Rescan(ScanCallback),
    Snapshot(Sender<PlayerSnapshot>),
    Shutdown,
}

/// Everything the owner thread needs to build its controller.
pub struct PlayerParts {
    pub playlist: Playlist,
    pub settings: Box<dyn Settings + Send>,
    pub renderer_factory: RendererFactory,
    pub scanner: Option<Arc<dyn Scanner>>,
    pub listener: Option<Box<dyn PlayerListener + Send>>,
}

/// Handle to the owner thread. Dropping it shuts the player down.
pub struct PlayerHandle {
    cmd_tx: Sender<ServiceMessage>,
    worker: Option<JoinHandle<()>>,
}

pub fn spawn_player(parts: PlayerParts) -> anyhow::Result<PlayerHandle> {
    let (cmd_tx, cmd_rx) = mpsc::channel();

    let worker = thread::Builder::new()
        .name(String::from("playback-owner"))
        .spawn(move || {
            let PlayerParts {
                playlist,
                settings,
                renderer_factory,
                scanner,
                listener,
            } = parts;

            let mut controller = PlaybackController::new(playlist, settings, renderer_factory);
            if let Some(scanner) = scanner {
                controller = controller.with_scanner(scanner);
            }
            if let Some(listener) = listener {
                controller.set_listener(listener);
            }

            info!("playback owner started");
            loop {
                match cmd_rx.recv_timeout(TICK_INTERVAL) {
                    Ok(ServiceMessage::Command(command)) => controller.handle_command(command),
                    Ok(ServiceMessage::Rescan(on_done)) => {
                        controller.update_music_list(Some(on_done));
                    }
                    Ok(ServiceMessage::Snapshot(reply)) => {
                        controller.pump();
                        let _ = reply.send(controller.snapshot());
                    }
                    Ok(ServiceMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                controller.tick();
            }

            controller.release();
            info!("playback owner stopped");
        })
        .context("failed to spawn playback owner thread")?;

    Ok(PlayerHandle {
        cmd_tx,
        worker: Some(worker),
    })
}

impl PlayerHandle {
    pub fn send(&self, command: Command) {
        if self.cmd_tx.send(ServiceMessage::Command(command)).is_err() {
            warn!(?command, "player is not running");
        }
    }

    /// Rescans and invokes `on_done` with the new track count once the
    /// playlist has been replaced on the owner thread.
    pub fn update_music_list(&self, on_done: impl FnOnce(usize) + Send + 'static) {
        if self
            .cmd_tx
            .send(ServiceMessage::Rescan(Box::new(on_done)))
            .is_err()
        {
            warn!("player is not running");
        }
    }

    pub fn snapshot(&self) -> Option<PlayerSnapshot> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.cmd_tx.send(ServiceMessage::Snapshot(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }

    pub fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(ServiceMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("playback owner thread panicked");
            }
            debug!("playback owner joined");
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
