//! Tag readers, one per supported tag convention.
//!
//! Readers are tried in a fixed order by the resolver. Each reader opens the
//! file itself and returns `None` when the file has no usable tags or cannot be
//! parsed at all.

use std::path::Path;
use std::time::Duration;

use lofty::file::TaggedFile;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;

use crate::types::TagRecord;

/// A single tag convention the resolver knows how to read.
pub trait TagReader: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Reads a normalized record from `path`, or `None` if nothing usable is there.
    fn read(&self, path: &Path) -> Option<TagRecord>;
}

/// Reads the primary tag through lofty's structured accessors
/// (ID3v2 frames, MP4 atoms, Vorbis comments, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessorTagReader;

/// Walks every tag item in the file as generic key/value pairs, including keys
/// lofty does not map to a known field.
#[derive(Debug, Default, Clone, Copy)]
pub struct ItemTagReader;

fn open_tagged(path: &Path) -> Option<TaggedFile> {
    match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(file) => Some(file),
        Err(e) => {
            log::debug!("No readable tags in {:?}: {}", path, e);
            None
        }
    }
}

impl TagReader for AccessorTagReader {
    fn name(&self) -> &'static str {
        "accessor"
    }

    fn read(&self, path: &Path) -> Option<TagRecord> {
        let tagged_file = open_tagged(path)?;
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())?;

        let record = TagRecord::normalized(
            tag.title().map(|s| s.to_string()),
            tag.artist().map(|s| s.to_string()),
            tag.album().map(|s| s.to_string()),
            tag.year().map(|y| y.to_string()),
        );
        (!record.is_empty()).then_some(record)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Field {
    Title,
    Artist,
    Album,
    Year,
}

fn field_for_key(key: &ItemKey) -> Option<Field> {
    match key {
        ItemKey::TrackTitle => Some(Field::Title),
        ItemKey::TrackArtist => Some(Field::Artist),
        ItemKey::AlbumTitle => Some(Field::Album),
        ItemKey::RecordingDate | ItemKey::Year => Some(Field::Year),
        ItemKey::Unknown(name) => match name.to_ascii_lowercase().as_str() {
            "title" | "tit2" => Some(Field::Title),
            "artist" | "tpe1" => Some(Field::Artist),
            "album" | "talb" => Some(Field::Album),
            "date" | "year" | "tdrc" => Some(Field::Year),
            _ => None,
        },
        _ => None,
    }
}

impl TagReader for ItemTagReader {
    fn name(&self) -> &'static str {
        "items"
    }

    fn read(&self, path: &Path) -> Option<TagRecord> {
        let tagged_file = open_tagged(path)?;

        let (mut title, mut artist, mut album, mut year) = (None, None, None, None);
        for tag in tagged_file.tags() {
            for item in tag.items() {
                let Some(text) = item.value().text() else {
                    continue;
                };
                if text.trim().is_empty() {
                    continue;
                }
                let slot = match field_for_key(item.key()) {
                    Some(Field::Title) => &mut title,
                    Some(Field::Artist) => &mut artist,
                    Some(Field::Album) => &mut album,
                    Some(Field::Year) => &mut year,
                    None => continue,
                };
                slot.get_or_insert_with(|| text.to_string());
            }
        }

        let record = TagRecord::normalized(title, artist, album, year);
        (!record.is_empty()).then_some(record)
    }
}

/// The readers used in production, in priority order.
pub fn default_tag_readers() -> Vec<std::sync::Arc<dyn TagReader>> {
    vec![
        std::sync::Arc::new(AccessorTagReader),
        std::sync::Arc::new(ItemTagReader),
    ]
}

/// Playback length of an audio file, if lofty can determine it.
pub fn read_duration(path: &Path) -> Option<Duration> {
    let tagged_file = open_tagged(path)?;
    let duration = tagged_file.properties().duration();
    (!duration.is_zero()).then_some(duration)
}
