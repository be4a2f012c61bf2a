//! Metadata resolution for book directories.
//!
//! Embedded tags come first, then whatever the folder layout implies, then
//! fixed defaults. Every step only fills fields that are still empty, so the
//! resolved value always has a non-empty title, artist and album.

pub mod readers;

use std::path::Path;
use std::sync::Arc;

use tokio::task::spawn_blocking;

pub use readers::{AccessorTagReader, ItemTagReader, TagReader, default_tag_readers};

use crate::path_utils::list_audio_files;
use crate::types::{BookDirectory, BookMetadata, LayoutKind, TagRecord, UNKNOWN_AUTHOR};

/// Title used when even the directory name is blank.
const UNTITLED: &str = "Untitled";

/// Resolves `BookMetadata` through the tag, structure and default fallbacks.
#[derive(Clone)]
pub struct MetadataResolver {
    readers: Vec<Arc<dyn TagReader>>,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new(default_tag_readers())
    }
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.readers.iter().map(|r| r.name()).collect();
        f.debug_struct("MetadataResolver")
            .field("readers", &names)
            .finish()
    }
}

impl MetadataResolver {
    /// Creates a resolver that tries `readers` in order.
    pub fn new(readers: Vec<Arc<dyn TagReader>>) -> Self {
        Self { readers }
    }

    /// Resolves metadata for `book` from its own directory.
    ///
    /// Returns `None` only when the directory holds no supported audio files.
    pub async fn resolve(&self, book: &BookDirectory) -> Option<BookMetadata> {
        self.resolve_in(&book.path, book).await
    }

    /// Resolves again over the staged copy, keeping the original layout
    /// classification for the structure fallback.
    pub async fn reresolve(&self, staged: &Path, book: &BookDirectory) -> Option<BookMetadata> {
        self.resolve_in(staged, book).await
    }

    async fn resolve_in(&self, audio_dir: &Path, book: &BookDirectory) -> Option<BookMetadata> {
        let audio_files = match list_audio_files(audio_dir).await {
            Ok(files) => files,
            Err(e) => {
                log::debug!("Cannot list audio in {:?}: {}", audio_dir, e);
                return None;
            }
        };
        let first = audio_files.into_iter().next()?;

        let tags = self.read_tags(first).await;
        Some(apply_fallbacks(tags, book))
    }

    /// Merges every reader's record for `path`, first non-empty value wins.
    async fn read_tags(&self, path: std::path::PathBuf) -> TagRecord {
        let readers = self.readers.clone();
        let task = spawn_blocking(move || {
            let mut merged = TagRecord::default();
            for reader in &readers {
                if let Some(record) = reader.read(&path) {
                    log::debug!("{} tags from {:?}: {:?}", reader.name(), path, record);
                    merged.fill_from(record);
                }
            }
            merged
        });

        match task.await {
            Ok(record) => record,
            Err(e) => {
                log::debug!("Tag reading task failed: {}", e);
                TagRecord::default()
            }
        }
    }
}

/// Completes a tag record from the folder layout and the defaults.
pub fn apply_fallbacks(tags: TagRecord, book: &BookDirectory) -> BookMetadata {
    let mut record = tags;

    let folder_name = Some(book.name().trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    if book.kind == LayoutKind::Structured && record.artist.is_none() {
        record.artist = book
            .inferred_author
            .as_deref()
            .map(str::trim)
            .filter(|author| !author.is_empty())
            .map(str::to_string);
    }
    if record.title.is_none() {
        record.title = folder_name.clone();
    }
    if record.album.is_none() {
        record.album = folder_name;
    }

    let title = record.title.unwrap_or_else(|| UNTITLED.to_string());
    BookMetadata {
        artist: record.artist.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        album: record.album.unwrap_or_else(|| title.clone()),
        title,
        year: record.year,
    }
}
