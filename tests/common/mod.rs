#![allow(dead_code)]

use nowplaying::audio::{EventSink, Renderer, RendererFactory};
use nowplaying::events::Session;
use nowplaying::model::Track;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Reset,
    SetSource(PathBuf),
    Prepare(Session),
    Start,
    Pause,
    Release,
}

/// Renderer that records every call and never answers `prepare_async` on
/// its own; tests post signals through the controller mailbox instead.
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Renderer for RecordingRenderer {
    fn reset(&mut self) {
        self.push(Call::Reset);
    }

    fn set_source(&mut self, path: &Path) -> anyhow::Result<()> {
        self.push(Call::SetSource(path.to_path_buf()));
        Ok(())
    }

    fn prepare_async(&mut self, session: Session) {
        self.push(Call::Prepare(session));
    }

    fn start(&mut self) {
        self.push(Call::Start);
    }

    fn pause(&mut self) {
        self.push(Call::Pause);
    }

    fn position(&self) -> Duration {
        Duration::from_millis(1_500)
    }

    fn tick(&mut self) {}

    fn release(&mut self) {
        self.push(Call::Release);
    }
}

impl RecordingRenderer {
    fn push(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

pub fn recording_factory() -> (RendererFactory, Arc<Mutex<Vec<Call>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let shared = calls.clone();
    let factory: RendererFactory = Box::new(move |_events: EventSink| {
        Ok(Box::new(RecordingRenderer {
            calls: shared.clone(),
        }) as Box<dyn Renderer>)
    });
    (factory, calls)
}

pub fn last_session(calls: &Arc<Mutex<Vec<Call>>>) -> Session {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .rev()
        .find_map(|call| match call {
            Call::Prepare(session) => Some(*session),
            _ => None,
        })
        .expect("a prepare call should have been recorded")
}

pub fn count_calls(calls: &Arc<Mutex<Vec<Call>>>, wanted: &Call) -> usize {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .filter(|call| *call == wanted)
        .count()
}

pub fn sources(calls: &Arc<Mutex<Vec<Call>>>) -> Vec<PathBuf> {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .filter_map(|call| match call {
            Call::SetSource(path) => Some(path.clone()),
            _ => None,
        })
        .collect()
}

pub fn tracks(count: usize) -> Vec<Track> {
    (0..count)
        .map(|n| Track::new(500 + n as i64, format!("music/track_{n}.mp3"), format!("track {n}")))
        .collect()
}
