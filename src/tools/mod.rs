//! External tool seams.
//!
//! The pipeline talks to the transcoder and the tagger only through the traits
//! defined here. The production implementations shell out to ffmpeg and beets;
//! tests substitute in-process fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;

use crate::config::ConversionConfig;
use crate::error::Result;
use crate::types::BookMetadata;

pub mod beets;
pub mod chapters;
pub mod ffmpeg;

pub use beets::BeetsTagger;
pub use ffmpeg::FfmpegTranscoder;

/// Encoder settings forwarded to the transcoder untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingOptions {
    pub codec: String,
    pub bitrate: String,
    /// Extra encoder flags selected by the quality profile.
    pub quality_flags: Vec<String>,
    /// Longest chapter marker, in seconds.
    pub max_chapter_length: u64,
}

impl EncodingOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            codec: config.codec.clone(),
            bitrate: config.bitrate.clone(),
            quality_flags: config.quality_profile.encoder_flags(),
            max_chapter_length: config.max_chapter_length,
        }
    }
}

/// Everything needed to merge one book into a single file.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    /// Chapter files in playback order.
    pub audio_files: Vec<PathBuf>,
    pub metadata: BookMetadata,
    pub output_path: PathBuf,
    pub options: EncodingOptions,
    pub cover: Option<PathBuf>,
    /// Job-scoped directory for helper files such as the concat list.
    pub scratch_dir: PathBuf,
}

/// Merges per-chapter audio into one tagged container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes `request.output_path`. On error the output may be partial; the
    /// caller removes it.
    async fn transcode(&self, request: &TranscodeRequest) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TagRequest {
    /// The staged book directory, tagged in place.
    pub directory: PathBuf,
    pub scratch_dir: PathBuf,
}

/// Rewrites embedded tags of a staged book from an external metadata source.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, request: &TagRequest) -> Result<()>;
}

/// Renders a tool's captured stderr for error messages.
pub(crate) fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim_end().to_string()
}

/// Best-effort removal of a helper file.
pub(crate) async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("Could not remove {:?}: {}", path, e);
        }
    }
}
