use crate::model::Track;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, info};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Produces the complete track list for some storage scope.
///
/// Called on a worker thread; implementations block until the whole result is
/// ready and never hand back partial lists.
pub trait Scanner: Send + Sync {
    fn scan(&self) -> Vec<Track>;
}

#[derive(Debug, Clone, Default)]
pub struct FolderScanner {
    roots: Vec<PathBuf>,
}

impl FolderScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl Scanner for FolderScanner {
    fn scan(&self) -> Vec<Track> {
        let tracks = scan_many(&self.roots);
        info!(roots = self.roots.len(), tracks = tracks.len(), "library scan finished");
        tracks
    }
}

/// Scanner returning a fixed list, for hosts that already know their tracks.
#[derive(Debug, Clone, Default)]
pub struct StaticScanner {
    tracks: Vec<Track>,
}

impl StaticScanner {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }
}

impl Scanner for StaticScanner {
    fn scan(&self) -> Vec<Track> {
        self.tracks.clone()
    }
}

#[derive(Default)]
struct TrackMetadata {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    duration_ms: Option<u64>,
}

/// Stable id for a track file, so the persisted last-track id survives rescans.
///
/// Always non-negative; `-1` stays free as the "nothing persisted" sentinel.
pub fn track_id_for_path(path: &Path) -> i64 {
    let normalized = crate::config::strip_windows_verbatim_prefix(path);
    let digest = Sha256::digest(normalized.to_string_lossy().as_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head) & i64::MAX
}

pub fn scan_folder(root: &Path) -> Vec<Track> {
    let mut tracks = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio(path) {
            continue;
        }

        let metadata = metadata_for(path);
        let title = metadata
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(OsStr::to_str)
                    .unwrap_or("unknown")
                    .to_string()
            });

        tracks.push(Track {
            id: track_id_for_path(path),
            path: PathBuf::from(path),
            title,
            artist: metadata.artist,
            album: metadata.album,
            duration_ms: metadata.duration_ms,
        });
    }

    debug!(root = %root.display(), found = tracks.len(), "scanned folder");
    tracks.sort_by(|a, b| a.path.cmp(&b.path));
    tracks
}

pub fn scan_many(roots: &[PathBuf]) -> Vec<Track> {
    let mut all = Vec::new();
    for root in roots {
        all.extend(scan_folder(root));
    }
    all.sort_by(|a, b| a.path.cmp(&b.path));
    all.dedup_by(|a, b| a.path == b.path);
    all
}

fn metadata_for(path: &Path) -> TrackMetadata {
    let stripped = crate::config::strip_windows_verbatim_prefix(path);

    let Ok(file) = File::open(&stripped) else {
        return TrackMetadata::default();
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = stripped.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return TrackMetadata::default();
    };

    let duration_ms = probed
        .format
        .default_track()
        .and_then(|track| codec_duration_ms(&track.codec_params));

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return TrackMetadata {
            duration_ms,
            ..TrackMetadata::default()
        };
    };

    let tags = revision.tags();
    TrackMetadata {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(tags, StandardTagKey::Album, &["album"]),
        duration_ms,
    }
}

fn codec_duration_ms(codec_params: &CodecParameters) -> Option<u64> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        let millis = time.seconds.saturating_mul(1_000) + (time.frac * 1_000.0).round() as u64;
        return Some(millis);
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| frame_count.saturating_mul(1_000) / u64::from(sample_rate))
}

fn tag_value(
    tags: &[symphonia::core::meta::Tag],
    standard_key: StandardTagKey,
    fallback_keys: &[&str],
) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard.or_else(from_fallback).and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then_some(trimmed.to_string())
    })
}

fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}
