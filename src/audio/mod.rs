use crate::events::{Inbound, RendererEvent, Session};
use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Opaque decoder/output capability driven by the controller.
///
/// `prepare_async` never blocks on readiness: it answers later with
/// [`RendererEvent::Prepared`] (or `Error`) through the [`EventSink`] the
/// renderer was built with. End of stream is reported from `tick` as
/// [`RendererEvent::Completed`].
pub trait Renderer {
    fn reset(&mut self);
    fn set_source(&mut self, path: &Path) -> Result<()>;
    fn prepare_async(&mut self, session: Session);
    fn start(&mut self);
    fn pause(&mut self);
    fn position(&self) -> Duration;
    fn tick(&mut self);
    fn release(&mut self);
}

/// Builds the renderer the first time a track is loaded.
pub type RendererFactory = Box<dyn FnMut(EventSink) -> Result<Box<dyn Renderer>> + Send>;

/// Posts renderer signals onto the controller mailbox.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Inbound>,
}

impl EventSink {
    pub fn new(tx: Sender<Inbound>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: RendererEvent) {
        if self.tx.send(Inbound::Renderer(event)).is_err() {
            debug!("renderer event dropped, controller mailbox closed");
        }
    }
}

struct Output {
    stream: OutputStream,
    sink: Sink,
}

pub struct RodioRenderer {
    output: Option<Output>,
    events: EventSink,
    session: Option<Session>,
    current: Option<PathBuf>,
    completion_sent: bool,
}

impl RodioRenderer {
    pub fn new(events: EventSink) -> Result<Self> {
        let (stream, sink) = Self::open_output_stream(None)?;
        Ok(Self {
            output: Some(Output { stream, sink }),
            events,
            session: None,
            current: None,
            completion_sent: false,
        })
    }

    pub fn with_device(events: EventSink, device: &str) -> Result<Self> {
        let (stream, sink) = Self::open_output_stream(Some(device))?;
        Ok(Self {
            output: Some(Output { stream, sink }),
            events,
            session: None,
            current: None,
            completion_sent: false,
        })
    }

    pub fn available_outputs() -> Vec<String> {
        let mut outputs: Vec<String> = with_silenced_stderr(|| {
            rodio::cpal::default_host()
                .output_devices()
                .ok()
                .into_iter()
                .flatten()
                .filter_map(|device| device.name().ok())
                .collect()
        });
        outputs.sort_by_cached_key(|name| name.to_ascii_lowercase());
        outputs.dedup();
        outputs
    }

    fn open_output_stream(output: Option<&str>) -> Result<(OutputStream, Sink)> {
        let mut stream = with_silenced_stderr(|| {
            let host = rodio::cpal::default_host();
            if let Some(requested) = output {
                let device = host
                    .output_devices()
                    .context("failed to enumerate output devices")?
                    .find(|candidate| candidate.name().ok().as_deref() == Some(requested))
                    .with_context(|| format!("audio output device not found: {requested}"))?;
                return OutputStreamBuilder::from_device(device)
                    .context("failed to open selected output device")?
                    .with_error_callback(|err| warn!("audio output error: {err}"))
                    .open_stream_or_fallback()
                    .context("failed to start selected output stream");
            }

            match OutputStreamBuilder::from_default_device()
                .context("failed to open default system output stream")
                .and_then(|builder| {
                    builder
                        .with_error_callback(|err| warn!("audio output error: {err}"))
                        .open_stream_or_fallback()
                        .context("failed to start default output stream")
                }) {
                Ok(stream) => Ok(stream),
                Err(default_err) => {
                    let mut candidates: Vec<String> = host
                        .output_devices()
                        .ok()
                        .into_iter()
                        .flatten()
                        .filter_map(|device| device.name().ok())
                        .collect();
                    candidates.sort_by_cached_key(|name| {
                        let lower = name.to_ascii_lowercase();
                        let rank = if lower.contains("pulse") {
                            0_u8
                        } else if lower.contains("pipewire") {
                            1_u8
                        } else if lower.contains("default") {
                            2_u8
                        } else {
                            3_u8
                        };
                        (rank, lower)
                    });
                    candidates.dedup();

                    for candidate in candidates {
                        let Some(device) = host.output_devices().ok().into_iter().flatten().find(
                            |entry| entry.name().ok().as_deref() == Some(candidate.as_str()),
                        ) else {
                            continue;
                        };
                        let opened = OutputStreamBuilder::from_device(device)
                            .context("failed to open fallback output device")
                            .and_then(|builder| {
                                builder
                                    .with_error_callback(|err| warn!("audio output error: {err}"))
                                    .open_stream_or_fallback()
                                    .context("failed to start fallback output stream")
                            });
                        if let Ok(stream) = opened {
                            debug!(device = %candidate, "using fallback output device");
                            return Ok(stream);
                        }
                    }

                    Err(anyhow::anyhow!(
                        "unable to start any audio output stream after default failed: {default_err:#}"
                    ))
                }
            }
        })?;
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        Ok((stream, sink))
    }
}

impl Renderer for RodioRenderer {
    fn reset(&mut self) {
        if let Some(output) = self.output.as_mut() {
            output.sink.stop();
            output.sink = Sink::connect_new(output.stream.mixer());
        }
        self.session = None;
        self.current = None;
        self.completion_sent = false;
    }

    fn set_source(&mut self, path: &Path) -> Result<()> {
        let Some(output) = self.output.as_ref() else {
            anyhow::bail!("renderer already released");
        };

        let file =
            File::open(path).with_context(|| format!("failed to open track {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;

        output.sink.pause();
        output.sink.append(source);
        self.current = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare_async(&mut self, session: Session) {
        self.session = Some(session);
        self.completion_sent = false;
        if self.current.is_none() {
            self.events
                .send(RendererEvent::Error(session, String::from("no source loaded")));
            return;
        }
        self.events.send(RendererEvent::Prepared(session));
    }

    fn start(&mut self) {
        if let Some(output) = &self.output {
            output.sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(output) = &self.output {
            output.sink.pause();
        }
    }

    fn position(&self) -> Duration {
        match (&self.output, &self.current) {
            (Some(output), Some(_)) => output.sink.get_pos(),
            _ => Duration::ZERO,
        }
    }

    fn tick(&mut self) {
        let (Some(output), Some(session)) = (&self.output, self.session) else {
            return;
        };
        if self.completion_sent || self.current.is_none() {
            return;
        }
        if !output.sink.is_paused() && output.sink.empty() {
            self.completion_sent = true;
            self.events.send(RendererEvent::Completed(session));
        }
    }

    fn release(&mut self) {
        if let Some(output) = self.output.take() {
            output.sink.stop();
            debug!("audio output released");
        }
        self.session = None;
        self.current = None;
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Renderer with a logical clock and no audio output.
///
/// Used when no output device can be opened. Any path is accepted; when the
/// file decodes, its duration drives completion.
pub struct NullRenderer {
    events: EventSink,
    session: Option<Session>,
    current: Option<PathBuf>,
    paused: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    completion_sent: bool,
    released: bool,
}

impl NullRenderer {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            session: None,
            current: None,
            paused: true,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            completion_sent: false,
            released: false,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }
}

impl Renderer for NullRenderer {
    fn reset(&mut self) {
        self.session = None;
        self.current = None;
        self.paused = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
        self.completion_sent = false;
    }

    fn set_source(&mut self, path: &Path) -> Result<()> {
        if self.released {
            anyhow::bail!("renderer already released");
        }
        self.current = Some(path.to_path_buf());
        self.track_duration = Self::estimate_duration(path);
        Ok(())
    }

    fn prepare_async(&mut self, session: Session) {
        self.session = Some(session);
        self.completion_sent = false;
        if self.current.is_none() {
            self.events
                .send(RendererEvent::Error(session, String::from("no source loaded")));
            return;
        }
        self.events.send(RendererEvent::Prepared(session));
    }

    fn start(&mut self) {
        if self.current.is_some() && self.paused {
            self.started_at = Some(Instant::now());
            self.paused = false;
        }
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn position(&self) -> Duration {
        if self.current.is_none() {
            return Duration::ZERO;
        }
        self.current_position()
    }

    fn tick(&mut self) {
        let (Some(session), Some(duration)) = (self.session, self.track_duration) else {
            return;
        };
        if self.completion_sent || self.paused || self.current.is_none() {
            return;
        }
        if self.current_position() >= duration {
            self.completion_sent = true;
            self.events.send(RendererEvent::Completed(session));
        }
    }

    fn release(&mut self) {
        self.reset();
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{EventSink, NullRenderer, Renderer};
    use crate::events::{Inbound, RendererEvent, Session};
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::mpsc::{self, Receiver};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn unique_test_dir(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be valid")
            .as_nanos();
        let dir = env::temp_dir().join(format!("nowplaying-{name}-{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn write_test_wav(path: &Path, duration_ms: u32) {
        let sample_rate: u32 = 44_100;
        let channels: u16 = 1;
        let bits_per_sample: u16 = 16;
        let bytes_per_sample = u32::from(bits_per_sample / 8);
        let total_samples = (u64::from(sample_rate) * u64::from(duration_ms) / 1_000) as u32;
        let data_size = total_samples * u32::from(channels) * bytes_per_sample;
        let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
        let block_align = channels * (bits_per_sample / 8);
        let riff_chunk_size = 36_u32.saturating_add(data_size);

        let mut bytes = Vec::with_capacity((44_u32 + data_size) as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&riff_chunk_size.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits_per_sample.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());
        bytes.resize((44_u32 + data_size) as usize, 0_u8);

        fs::write(path, bytes).expect("wav fixture should be written");
    }

    fn null_renderer() -> (NullRenderer, Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel();
        (NullRenderer::new(EventSink::new(tx)), rx)
    }

    fn renderer_events(rx: &Receiver<Inbound>) -> Vec<RendererEvent> {
        rx.try_iter()
            .filter_map(|inbound| match inbound {
                Inbound::Renderer(event) => Some(event),
                Inbound::ScanFinished { .. } => None,
            })
            .collect()
    }

    #[test]
    fn prepare_posts_prepared_for_the_session() {
        let (mut renderer, rx) = null_renderer();
        let session = Session::default().next();
        renderer
            .set_source(Path::new("nonexistent-track.flac"))
            .expect("null renderer accepts any path");
        renderer.prepare_async(session);

        assert_eq!(renderer_events(&rx), vec![RendererEvent::Prepared(session)]);
    }

    #[test]
    fn prepare_without_source_reports_error() {
        let (mut renderer, rx) = null_renderer();
        let session = Session::default().next();
        renderer.prepare_async(session);

        let events = renderer_events(&rx);
        assert!(matches!(events.as_slice(), [RendererEvent::Error(s, _)] if *s == session));
    }

    #[test]
    fn position_advances_only_after_start() {
        let (mut renderer, _rx) = null_renderer();
        renderer
            .set_source(Path::new("nonexistent-track.flac"))
            .expect("set source");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(renderer.position(), Duration::ZERO);

        renderer.start();
        thread::sleep(Duration::from_millis(20));
        assert!(renderer.position() > Duration::ZERO);
    }

    #[test]
    fn pause_freezes_position() {
        let (mut renderer, _rx) = null_renderer();
        renderer
            .set_source(Path::new("nonexistent-track.flac"))
            .expect("set source");
        renderer.start();
        thread::sleep(Duration::from_millis(20));

        renderer.pause();
        let paused = renderer.position();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(renderer.position(), paused, "position should freeze while paused");

        renderer.start();
        thread::sleep(Duration::from_millis(20));
        assert!(renderer.position() > paused, "position should continue after start");
    }

    #[test]
    fn completion_fires_once_when_known_duration_elapses() {
        let dir = unique_test_dir("null-renderer-duration");
        let track = dir.join("fixture.wav");
        write_test_wav(&track, 80);

        let (mut renderer, rx) = null_renderer();
        let session = Session::default().next();
        renderer.set_source(&track).expect("set source");
        renderer.prepare_async(session);
        let duration = renderer.duration().expect("duration should be detected");
        assert!(duration >= Duration::from_millis(70));

        renderer.start();
        thread::sleep(Duration::from_millis(120));
        renderer.tick();
        renderer.tick();

        assert_eq!(
            renderer_events(&rx),
            vec![
                RendererEvent::Prepared(session),
                RendererEvent::Completed(session)
            ]
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_duration_never_completes() {
        let (mut renderer, rx) = null_renderer();
        let session = Session::default().next();
        renderer
            .set_source(Path::new("nonexistent-track.flac"))
            .expect("set source");
        renderer.prepare_async(session);
        renderer.start();
        thread::sleep(Duration::from_millis(40));
        renderer.tick();

        assert_eq!(renderer_events(&rx), vec![RendererEvent::Prepared(session)]);
    }

    #[test]
    fn zero_length_duration_is_treated_as_unknown() {
        let dir = unique_test_dir("null-renderer-zero-duration");
        let track = dir.join("zero.wav");
        write_test_wav(&track, 0);

        let (mut renderer, _rx) = null_renderer();
        renderer.set_source(&track).expect("set source");
        assert_eq!(renderer.duration(), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn released_renderer_rejects_new_sources() {
        let (mut renderer, _rx) = null_renderer();
        renderer.release();
        assert!(renderer.is_released());
        assert!(renderer.set_source(Path::new("a.mp3")).is_err());
    }
}
