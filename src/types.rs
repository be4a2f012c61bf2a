//! Core data types, enums, and job bookkeeping for the bookbinder pipeline.
//!
//! This module defines the fundamental data structures used throughout the crate:
//! - Resolved book metadata (`BookMetadata`) and per-reader tag records (`TagRecord`)
//! - Input classification (`LayoutKind`, `BookDirectory`)
//! - The per-book unit of work (`ProcessingJob`) and its state machine (`JobState`)
//! - Pipeline results (`JobOutcome`)
//! - Encoder presets (`QualityProfile`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Artist used when neither tags nor folder layout name one.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Canonical metadata for one book, as embedded into the output file.
///
/// Instances are always built whole by the resolver. After external tagging the
/// pipeline swaps the entire value; fields are never patched one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<String>,
}

/// Optional fields read from one tag convention. Blank values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
}

impl TagRecord {
    /// Builds a record, dropping whitespace-only values and letting a missing
    /// title fall back to the album tag.
    pub fn normalized(
        title: Option<String>,
        artist: Option<String>,
        album: Option<String>,
        year: Option<String>,
    ) -> Self {
        let album = non_blank(album);
        Self {
            title: non_blank(title).or_else(|| album.clone()),
            artist: non_blank(artist),
            album,
            year: non_blank(year),
        }
    }

    /// Fills this record's empty fields from `other`.
    pub fn fill_from(&mut self, other: TagRecord) {
        if self.title.is_none() {
            self.title = other.title;
        }
        if self.artist.is_none() {
            self.artist = other.artist;
        }
        if self.album.is_none() {
            self.album = other.album;
        }
        if self.year.is_none() {
            self.year = other.year;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.year.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// How a book directory sits below the input root.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum LayoutKind {
    /// `input/Book/`
    Flat,
    /// `input/Author/Book/`
    Structured,
}

/// A candidate book directory plus its layout classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDirectory {
    pub path: PathBuf,
    pub kind: LayoutKind,
    pub inferred_author: Option<String>,
    pub inferred_book: String,
}

impl BookDirectory {
    /// The directory's own name, used as the last-resort title.
    pub fn name(&self) -> &str {
        &self.inferred_book
    }
}

/// Pipeline states. Transitions only move forward; `Failed` is reachable from
/// every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Discovered,
    MetadataExtracted,
    SkippedDuplicate,
    Staged,
    Tagged,
    Transcoded,
    Committed,
    CleanedUp,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::SkippedDuplicate | JobState::CleanedUp | JobState::Failed
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Discovered, MetadataExtracted) => true,
            (MetadataExtracted, SkippedDuplicate | Staged) => true,
            (Staged, Tagged | Transcoded) => true,
            (Tagged, Transcoded) => true,
            (Transcoded, Committed) => true,
            (Committed, CleanedUp) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Transient unit of work for one book. Never persisted.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub source_path: PathBuf,
    /// Job-scoped scratch directory under the temp root.
    pub temp_path: PathBuf,
    pub metadata: Option<BookMetadata>,
    pub output_path: Option<PathBuf>,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(source_path: PathBuf, temp_path: PathBuf) -> Self {
        Self {
            source_path,
            temp_path,
            metadata: None,
            output_path: None,
            state: JobState::Discovered,
            started_at: Utc::now(),
        }
    }

    /// The staged copy of the source inside the scratch directory.
    pub fn staged_path(&self) -> PathBuf {
        self.temp_path.join("book")
    }

    /// Moves the job to `next`, rejecting backwards or skipped transitions.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Other(format!(
                "Illegal job transition {} -> {} for {:?}",
                self.state, next, self.source_path
            )));
        }
        log::debug!("{:?}: {} -> {}", self.source_path, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Marks the job failed. Terminal states are left unchanged.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
    }

    /// Seconds since the job was admitted.
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// Successful ways a job can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The output file was created at the given path.
    Committed(PathBuf),
    /// Another process created the destination first; treated as success.
    CommitRaced(PathBuf),
    /// The output already existed; the redundant source was removed.
    SkippedDuplicate(PathBuf),
    /// The same source is already being processed by another trigger.
    AlreadyInFlight,
    /// The source was gone by the time the job was admitted, usually because an
    /// earlier trigger for the same book already finished it.
    SourceVanished,
}

/// Named encoder presets. The flags are forwarded to the transcoder untouched.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    #[default]
    High,
    Medium,
    Low,
}

impl QualityProfile {
    /// Encoder flags attached for this profile.
    pub fn encoder_flags(self) -> Vec<String> {
        let flags: &[&str] = match self {
            QualityProfile::High => &[
                "-afterburner",
                "1",
                "-cutoff",
                "20000",
                "-profile:a",
                "aac_he_v2",
            ],
            QualityProfile::Medium => &["-cutoff", "15000"],
            QualityProfile::Low => &[],
        };
        flags.iter().map(|f| f.to_string()).collect()
    }

    /// Transcode time budget when the configuration does not set one.
    pub fn default_transcode_timeout(self) -> Duration {
        match self {
            QualityProfile::High => Duration::from_secs(5400),
            QualityProfile::Medium | QualityProfile::Low => Duration::from_secs(3600),
        }
    }
}
