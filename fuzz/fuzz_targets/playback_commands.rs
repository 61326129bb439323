#![no_main]

use libfuzzer_sys::fuzz_target;
use nowplaying::audio::{NullRenderer, Renderer};
use nowplaying::config::MemorySettings;
use nowplaying::controller::PlaybackController;
use nowplaying::model::{PlayMode, Playlist, Track};

fuzz_target!(|data: &[u8]| {
    let len = data.first().map_or(0, |byte| usize::from(*byte % 16));
    let tracks = (0..len)
        .map(|idx| Track::new(idx as i64 + 1, format!("track_{idx}.mp3"), format!("track {idx}")))
        .collect();
    let mut core = PlaybackController::new(
        Playlist::new(tracks),
        Box::new(MemorySettings::new()),
        Box::new(|events| Ok(Box::new(NullRenderer::new(events)) as Box<dyn Renderer>)),
    )
    .with_shuffle_seed(u64::from(data.len() as u32));

    for byte in data.iter().skip(1) {
        match byte % 10 {
            0 => core.next(),
            1 => core.prev(),
            2 => core.play_pause(),
            3 => core.stop(),
            4 => core.play_index(i64::from(*byte as i8)),
            5 => core.set_play_mode(PlayMode::from_code(i32::from(byte / 10 % 4))),
            6 => {
                core.pump();
            }
            7 => core.update_playing_position(),
            8 => core.finish_rescan(Vec::new(), None),
            _ => {
                core.cycle_play_mode();
            }
        }

        if let Some(cursor) = core.playing_position() {
            assert!(cursor < core.playlist().len());
        }
    }
});
