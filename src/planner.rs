//! Output path planning and the idempotence check.

use std::path::{Path, PathBuf};

use crate::config::OutputStructureConfig;
use crate::path_utils::PathSanitizer;
use crate::types::{BookMetadata, UNKNOWN_AUTHOR};

/// Where a finished book will live in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub directory: PathBuf,
    pub filename: String,
}

impl PlannedOutput {
    pub fn final_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// Maps metadata onto `output_root/Author/Book/Book.<ext>`.
#[derive(Debug, Clone)]
pub struct OutputPathPlanner {
    output_root: PathBuf,
    sanitizer: PathSanitizer,
    extension: String,
}

impl OutputPathPlanner {
    pub fn new(output_root: impl Into<PathBuf>, config: &OutputStructureConfig) -> Self {
        Self {
            output_root: output_root.into(),
            sanitizer: PathSanitizer::new(config),
            extension: config.extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Plans the destination for `metadata`. No directories are created.
    ///
    /// # Arguments
    ///
    /// * `metadata` - Resolved metadata; artist and album name the directories
    /// * `fallback_name` - Replaces an album that sanitizes to nothing
    ///
    /// # Returns
    ///
    /// * `PlannedOutput` - The `Author/Book` directory and the `Book.<ext>` file name
    pub fn plan(&self, metadata: &BookMetadata, fallback_name: &str) -> PlannedOutput {
        let mut artist = self.sanitizer.sanitize(&metadata.artist);
        if artist.is_empty() {
            artist = UNKNOWN_AUTHOR.to_string();
        }

        let mut book = self.sanitizer.sanitize(&metadata.album);
        if book.is_empty() {
            book = self.sanitizer.sanitize(fallback_name);
        }
        if book.is_empty() {
            book = "Untitled".to_string();
        }

        PlannedOutput {
            directory: self.output_root.join(artist).join(&book),
            filename: format!("{}.{}", book, self.extension),
        }
    }

    /// Whether the planned file already exists. This is the only idempotence gate.
    pub fn already_done(&self, planned: &PlannedOutput) -> bool {
        planned.final_path().exists()
    }
}
