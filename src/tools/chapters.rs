//! FFMETADATA1 chapter files.
//!
//! One chapter per source track. Tracks longer than the configured cap are split
//! into equal parts no longer than the cap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::spawn_blocking;

use crate::error::{Error, Result};
use crate::metadata::readers::read_duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Lays out chapters for consecutive tracks. `max_length_secs == 0` disables splitting.
pub fn layout(tracks: &[(String, Duration)], max_length_secs: u64) -> Vec<Chapter> {
    let cap_ms = max_length_secs.saturating_mul(1000);
    let mut chapters = Vec::new();
    let mut cursor = 0u64;

    for (title, duration) in tracks {
        let length = duration.as_millis() as u64;
        if length == 0 {
            continue;
        }
        let parts = if cap_ms == 0 { 1 } else { length.div_ceil(cap_ms) };

        for part in 0..parts {
            let start = cursor + length * part / parts;
            let end = cursor + length * (part + 1) / parts;
            let title = if parts > 1 {
                format!("{} ({}/{})", title, part + 1, parts)
            } else {
                title.clone()
            };
            chapters.push(Chapter {
                title,
                start_ms: start,
                end_ms: end,
            });
        }
        cursor += length;
    }
    chapters
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn render(chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    for chapter in chapters {
        out.push_str("[CHAPTER]\nTIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\nEND={}\n", chapter.start_ms, chapter.end_ms));
        out.push_str(&format!("title={}\n", escape(&chapter.title)));
    }
    out
}

fn track_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "Chapter".to_string())
}

/// Writes a chapter file for `audio_files` next to the other helper files.
///
/// Returns `None` when any track duration is unknown; the book is then merged
/// without chapter markers.
pub async fn write_chapter_file(
    audio_files: &[PathBuf],
    max_length_secs: u64,
    destination: &Path,
) -> Result<Option<PathBuf>> {
    let files = audio_files.to_vec();
    let tracks = spawn_blocking(move || {
        files
            .iter()
            .map(|path| read_duration(path).map(|d| (track_title(path), d)))
            .collect::<Option<Vec<_>>>()
    })
    .await
    .map_err(|e| Error::AsyncTaskError(e.to_string()))?;

    let Some(tracks) = tracks else {
        log::debug!("Unknown track duration, skipping chapter markers");
        return Ok(None);
    };

    let chapters = layout(&tracks, max_length_secs);
    if chapters.is_empty() {
        return Ok(None);
    }
    tokio::fs::write(destination, render(&chapters)).await?;
    Ok(Some(destination.to_path_buf()))
}
