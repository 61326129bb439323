mod common;

use common::tracks;
use nowplaying::audio::{NullRenderer, Renderer};
use nowplaying::config::MemorySettings;
use nowplaying::events::{ChannelListener, PlayerEvent};
use nowplaying::library::StaticScanner;
use nowplaying::model::{PlayMode, PlaybackState, Playlist};
use nowplaying::service::{Command, PlayerHandle, PlayerParts, spawn_player};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

fn spawn(count: usize) -> (PlayerHandle, Receiver<PlayerEvent>) {
    let (tx, rx) = mpsc::channel();
    let handle = spawn_player(PlayerParts {
        playlist: Playlist::default(),
        settings: Box::new(MemorySettings::new().with_last_track_id(501)),
        renderer_factory: Box::new(|events| {
            Ok(Box::new(NullRenderer::new(events)) as Box<dyn Renderer>)
        }),
        scanner: Some(Arc::new(StaticScanner::new(tracks(count)))),
        listener: Some(Box::new(ChannelListener::new(tx))),
    })
    .expect("player should spawn");
    (handle, rx)
}

fn wait_for_state(player: &PlayerHandle, state: PlaybackState) -> nowplaying::events::PlayerSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = player.snapshot().expect("player should answer");
        if snapshot.state == state {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "never reached {state:?}: {snapshot:?}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn rescan_then_play_through_owner_thread() {
    let (mut player, events) = spawn(3);

    let (done_tx, done_rx) = mpsc::channel();
    player.update_music_list(move |count| {
        let _ = done_tx.send(count);
    });
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(3));

    let snapshot = player.snapshot().expect("snapshot");
    assert_eq!(snapshot.playlist_len, 3);
    assert_eq!(snapshot.cursor, Some(1));
    assert_eq!(snapshot.state, PlaybackState::Idle);

    player.send(Command::PlayPause);
    let snapshot = wait_for_state(&player, PlaybackState::Playing);
    assert_eq!(snapshot.track.map(|track| track.id), Some(501));

    player.send(Command::PlayPause);
    wait_for_state(&player, PlaybackState::Paused);

    player.send(Command::SetMode(PlayMode::Single));
    player.send(Command::Next);
    let snapshot = wait_for_state(&player, PlaybackState::Playing);
    assert_eq!(snapshot.cursor, Some(1));
    assert_eq!(snapshot.play_mode, PlayMode::Single);

    player.shutdown();
    assert!(player.snapshot().is_none(), "owner thread should be gone");

    let received: Vec<PlayerEvent> = events.try_iter().collect();
    assert_eq!(received.first(), Some(&PlayerEvent::PlaylistUpdated(3)));
    assert!(received.contains(&PlayerEvent::Paused));
}

#[test]
fn commands_on_empty_library_are_ignored() {
    let (mut player, _events) = spawn(0);
    player.send(Command::Next);
    player.send(Command::Play(3));
    player.send(Command::PlayPause);

    let snapshot = player.snapshot().expect("snapshot");
    assert_eq!(snapshot.state, PlaybackState::Idle);
    assert_eq!(snapshot.cursor, None);
    assert_eq!(snapshot.position_ms, 0);
    player.shutdown();
}

#[test]
fn dropping_the_handle_stops_the_owner_thread() {
    let (player, events) = spawn(2);
    drop(player);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match events.recv_timeout(Duration::from_millis(50)) {
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            _ => assert!(Instant::now() < deadline, "listener was never dropped"),
        }
    }
}
