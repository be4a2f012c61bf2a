//! Path utilities for safe and robust file path handling.
//!
//! This module provides the name sanitizer used for the output tree, helpers for
//! finding audio and cover files inside a book directory, the recursive copy used
//! for staging, and the stable per-source job key.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::read_dir;
use tokio::task::spawn_blocking;

use crate::config::OutputStructureConfig;
use crate::error::{Error, Result};

/// Extensions (lowercase) treated as chapter audio.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a"];

/// Extensions (lowercase) accepted for `cover.*` and `folder.*` images.
const COVER_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Hex digits of the source path hash kept in a job key.
const JOB_KEY_HASH_LEN: usize = 12;

lazy_static! {
    /// Characters that are illegal in file names on at least one common filesystem.
    /// Whitespace controls are left for the collapsing pass.
    static ref RESERVED_CHARS_REGEX: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x08\x0E-\x1F\x7F]"#).unwrap();
    /// Path separators and control characters, stripped even when sanitizing is off.
    static ref SEPARATOR_CHARS_REGEX: Regex = Regex::new(r"[/\\\x00-\x1F\x7F]").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalizes free text into a single safe path component.
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    enabled: bool,
    max_length: usize,
}

impl PathSanitizer {
    pub fn new(config: &OutputStructureConfig) -> Self {
        Self {
            enabled: config.sanitize_names,
            max_length: config.max_filename_length,
        }
    }

    /// Sanitizes `name` for use as a file or directory name.
    ///
    /// Reserved characters are removed, whitespace runs collapse to one space, and
    /// the result is trimmed and truncated to the configured length in characters.
    /// Trailing dots are dropped so the result can never be `.` or `..`.
    ///
    /// # Arguments
    ///
    /// * `name` - An author or book name taken from tags or a folder
    ///
    /// # Returns
    ///
    /// * `String` - The sanitized name, empty when nothing usable remains
    pub fn sanitize(&self, name: &str) -> String {
        if !self.enabled {
            let stripped = SEPARATOR_CHARS_REGEX.replace_all(name, "");
            return trim_component(&stripped).to_string();
        }

        let stripped = RESERVED_CHARS_REGEX.replace_all(name, "");
        let collapsed = WHITESPACE_REGEX.replace_all(&stripped, " ");
        let trimmed = collapsed.trim();

        let truncated: String = trimmed.chars().take(self.max_length).collect();
        trim_component(&truncated).to_string()
    }
}

fn trim_component(name: &str) -> &str {
    name.trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Gets the file name from a path with fallback to lossy conversion.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks if a filename starts with a dot (hidden file).
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Whether `path` has one of the supported audio extensions (case-insensitive).
pub fn is_supported_audio(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| SUPPORTED_AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lists the regular, non-hidden files directly inside `directory`, sorted by name.
async fn list_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = read_dir(directory).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_hidden_file(&path) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Lists the supported audio files directly inside `directory` in lexicographic
/// filename order.
pub async fn list_audio_files(directory: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_files(directory)
        .await?
        .into_iter()
        .filter(|p| is_supported_audio(p))
        .collect())
}

/// Whether `directory` directly contains at least one supported audio file.
/// Unreadable directories count as empty.
pub async fn has_audio_files(directory: &Path) -> bool {
    match list_audio_files(directory).await {
        Ok(files) => !files.is_empty(),
        Err(e) => {
            log::debug!("Cannot inspect {:?}: {}", directory, e);
            false
        }
    }
}

/// Probes for cover art in the order `cover.*`, `folder.*`, `*.jpg`, `*.png`.
pub async fn find_cover_image(directory: &Path) -> Option<PathBuf> {
    let files = list_files(directory).await.ok()?;
    files
        .into_iter()
        .filter_map(|path| cover_rank(&path).map(|rank| (rank, path)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, path)| path)
}

/// Lower is better; `None` means the file is not a cover candidate.
fn cover_rank(path: &Path) -> Option<u8> {
    let ext = lowercase_extension(path)?;
    let stem = path.file_stem()?.to_string_lossy().to_lowercase();
    let is_image = COVER_IMAGE_EXTENSIONS.contains(&ext.as_str());

    match (stem.as_str(), ext.as_str()) {
        ("cover", _) if is_image => Some(0),
        ("folder", _) if is_image => Some(1),
        (_, "jpg" | "jpeg") => Some(2),
        (_, "png") => Some(3),
        _ => None,
    }
}

/// Recursively copies `source` into `destination`, which must not exist yet.
pub async fn copy_dir_all(source: &Path, destination: &Path) -> std::io::Result<()> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    spawn_blocking(move || copy_dir_blocking(&source, &destination))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
}

fn copy_dir_blocking(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(destination)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_blocking(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Derives the stable scratch key for a source directory.
///
/// The same source always maps to the same key, so a retry finds (and discards)
/// the leftovers of an earlier attempt. Different sources never share a key.
pub fn job_key(source: &Path, sanitizer: &PathSanitizer) -> String {
    let digest = Sha256::digest(path_to_string_lossy(source).as_bytes());
    let hash = format!("{:x}", digest);
    let name: String = sanitizer
        .sanitize(&get_file_name_lossy(source))
        .chars()
        .take(48)
        .collect();
    format!("job-{}-{}", name.trim_end(), &hash[..JOB_KEY_HASH_LEN])
}

/// Removes a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::InvalidPath(
            path.to_path_buf(),
            format!("Cannot remove directory: {}", e),
        )),
    }
}
