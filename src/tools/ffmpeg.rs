//! ffmpeg-backed transcoder.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::chapters::write_chapter_file;
use super::{TranscodeRequest, Transcoder, remove_file_quietly, stderr_text};
use crate::error::{Error, Result};

const CONCAT_LIST_NAME: &str = "concat.txt";
const CHAPTERS_NAME: &str = "chapters.txt";

/// Runs `ffmpeg` with the concat demuxer over the staged chapter files.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Renders the concat demuxer input list.
pub fn concat_list(audio_files: &[PathBuf]) -> String {
    audio_files
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Builds the ffmpeg argument vector. Inputs come first, then stream mapping,
/// encoder settings and metadata, then the output path.
pub fn build_args(request: &TranscodeRequest, list_path: &Path, chapters: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |value: &str| args.push(OsString::from(value));

    push("-y");
    push("-f");
    push("concat");
    push("-safe");
    push("0");
    push("-i");
    args.push(list_path.as_os_str().to_owned());

    let mut next_input = 1;
    let cover_index = request.cover.as_ref().map(|cover| {
        args.push("-i".into());
        args.push(cover.as_os_str().to_owned());
        next_input += 1;
        next_input - 1
    });
    let chapters_index = chapters.map(|path| {
        args.push("-i".into());
        args.push(path.as_os_str().to_owned());
        next_input += 1;
        next_input - 1
    });

    let mut push = |value: String| args.push(OsString::from(value));
    push("-map".to_string());
    push("0:a".to_string());
    if let Some(index) = cover_index {
        push("-map".to_string());
        push(format!("{}:v", index));
        push("-c:v".to_string());
        push("copy".to_string());
        push("-disposition:v".to_string());
        push("attached_pic".to_string());
    }
    if let Some(index) = chapters_index {
        push("-map_metadata".to_string());
        push(index.to_string());
        push("-map_chapters".to_string());
        push(index.to_string());
    }

    push("-c:a".to_string());
    push(request.options.codec.clone());
    push("-b:a".to_string());
    push(request.options.bitrate.clone());
    for flag in &request.options.quality_flags {
        push(flag.clone());
    }
    push("-movflags".to_string());
    push("+faststart".to_string());

    let metadata = &request.metadata;
    push("-metadata".to_string());
    push(format!("title={}", metadata.title));
    push("-metadata".to_string());
    push(format!("artist={}", metadata.artist));
    push("-metadata".to_string());
    push(format!("album={}", metadata.album));
    if let Some(year) = &metadata.year {
        push("-metadata".to_string());
        push(format!("date={}", year));
    }

    args.push(request.output_path.as_os_str().to_owned());
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<()> {
        if request.audio_files.is_empty() {
            return Err(Error::Transcode {
                path: request.output_path.clone(),
                reason: "No audio files to merge".to_string(),
            });
        }

        let list_path = request.scratch_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(&request.audio_files)).await?;

        let chapters_path = request.scratch_dir.join(CHAPTERS_NAME);
        let chapters = write_chapter_file(
            &request.audio_files,
            request.options.max_chapter_length,
            &chapters_path,
        )
        .await?;

        let args = build_args(request, &list_path, chapters.as_deref());
        log::debug!("Running {:?} {:?}", self.ffmpeg_path, args);

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        remove_file_quietly(&list_path).await;
        if chapters.is_some() {
            remove_file_quietly(&chapters_path).await;
        }

        let output = result.map_err(|e| Error::Transcode {
            path: request.output_path.clone(),
            reason: format!("Cannot start {:?}: {}", self.ffmpeg_path, e),
        })?;
        if !output.status.success() {
            return Err(Error::Transcode {
                path: request.output_path.clone(),
                reason: format!("ffmpeg exited with {}: {}", output.status, stderr_text(&output)),
            });
        }

        log::info!("Merged {} tracks into {:?}", request.audio_files.len(), request.output_path);
        Ok(())
    }
}
