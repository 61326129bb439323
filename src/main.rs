use nowplaying::audio::{NullRenderer, Renderer, RendererFactory, RodioRenderer};
use nowplaying::config::{self, FileSettings, MemorySettings, Settings};
use nowplaying::events::{ChannelListener, PlayerEvent};
use nowplaying::library::FolderScanner;
use nowplaying::model::{PlayMode, Playlist};
use nowplaying::service::{Command, PlayerParts, spawn_player};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct CliArgs {
    folders: Vec<PathBuf>,
    mode: Option<PlayMode>,
    device: Option<String>,
    null_audio: bool,
    ephemeral: bool,
    list_devices: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1).collect())?;
    if args.list_devices {
        for name in RodioRenderer::available_outputs() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut settings: Box<dyn Settings + Send> = if args.ephemeral {
        Box::new(MemorySettings::new())
    } else {
        let file = FileSettings::open()?;
        info!(path = %file.path().display(), "using saved state");
        Box::new(file)
    };

    if !args.folders.is_empty() {
        let mut folders = settings.folders();
        for folder in &args.folders {
            let normalized = config::normalize_path(folder);
            if !folders.contains(&normalized) {
                folders.push(normalized);
            }
        }
        settings.set_folders(folders);
    }
    if let Some(mode) = args.mode {
        settings.set_play_mode_code(mode.code());
    }

    let scanner = FolderScanner::new(settings.folders());
    info!(
        "Starting nowplaying v{} with {} folder(s)",
        env!("CARGO_PKG_VERSION"),
        scanner.roots().len()
    );

    let (event_tx, event_rx) = mpsc::channel();
    let printer = thread::spawn(move || {
        for event in event_rx {
            print_event(&event);
        }
    });

    let mut player = spawn_player(PlayerParts {
        playlist: Playlist::default(),
        settings,
        renderer_factory: renderer_factory(args.null_audio, args.device),
        scanner: Some(Arc::new(scanner)),
        listener: Some(Box::new(ChannelListener::new(event_tx))),
    })?;

    player.update_music_list(|count| println!("library: {count} track(s)"));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "q" | "quit" | "exit" => break,
            "pos" | "status" => match player.snapshot() {
                Some(snapshot) => println!(
                    "{:?} [{}] {} {}ms ({} tracks, {})",
                    snapshot.state,
                    snapshot
                        .cursor
                        .map_or_else(|| String::from("-"), |cursor| cursor.to_string()),
                    snapshot
                        .track
                        .as_ref()
                        .map_or("(none)", |track| track.title.as_str()),
                    snapshot.position_ms,
                    snapshot.playlist_len,
                    snapshot.play_mode.label()
                ),
                None => break,
            },
            "h" | "help" => print_commands(),
            _ => match Command::parse(&line) {
                Some(command) => player.send(command),
                None => println!("unknown command: {}", line.trim()),
            },
        }
    }

    player.shutdown();
    drop(player);
    let _ = printer.join();
    Ok(())
}

fn renderer_factory(null_audio: bool, device: Option<String>) -> RendererFactory {
    Box::new(move |events| {
        if null_audio {
            return Ok(Box::new(NullRenderer::new(events)) as Box<dyn Renderer>);
        }
        let opened = match device.as_deref() {
            Some(name) => RodioRenderer::with_device(events.clone(), name),
            None => RodioRenderer::new(events.clone()),
        };
        match opened {
            Ok(renderer) => Ok(Box::new(renderer) as Box<dyn Renderer>),
            Err(err) => {
                warn!("audio output unavailable, using null renderer: {err:#}");
                Ok(Box::new(NullRenderer::new(events)) as Box<dyn Renderer>)
            }
        }
    })
}

fn print_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::Started => println!("> playing"),
        PlayerEvent::Paused => println!("> paused"),
        PlayerEvent::Changed(track) => match &track.artist {
            Some(artist) => println!("> {} - {}", artist, track.title),
            None => println!("> {}", track.title),
        },
        PlayerEvent::LoadFailed { track, error } => {
            println!("> could not play {}: {error}", track.title)
        }
        PlayerEvent::PlaylistUpdated(count) => println!("> playlist now has {count} track(s)"),
    }
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--folder" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--folder requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--folder cannot be empty");
                }
                out.folders.push(PathBuf::from(value.trim()));
            }
            "--mode" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--mode requires loop, single or shuffle");
                };
                let Some(mode) = PlayMode::parse(value) else {
                    anyhow::bail!("unknown play mode {value}");
                };
                out.mode = Some(mode);
            }
            "--device" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--device requires an output device name");
                };
                out.device = Some(value.clone());
            }
            "--null-audio" => out.null_audio = true,
            "--ephemeral" => out.ephemeral = true,
            "--list-devices" => out.list_devices = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("nowplaying");
    println!("  --folder DIR      Add a music folder (repeatable, remembered)");
    println!("  --mode MODE       loop | single | shuffle");
    println!("  --device NAME     Output device name");
    println!("  --list-devices    Print output devices and exit");
    println!("  --null-audio      Run without audio output");
    println!("  --ephemeral       Do not read or write saved state");
    println!();
    print_commands();
}

fn print_commands() {
    println!("commands: n(ext) p(rev) pp|toggle stop play N mode [MODE] rescan pos quit");
}
