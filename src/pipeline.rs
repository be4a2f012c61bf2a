//! Per-book processing pipeline.
//!
//! [`Pipeline::process`] drives one book directory through resolution, the
//! idempotence gate, staging, optional external tagging, transcoding, commit
//! and cleanup. Each stage only runs after the previous one succeeded; the job's
//! [`JobState`] records how far it got.
//!
//! ## Builder Pattern
//!
//! ```rust,no_run
//! # use bookbinder::prelude::*;
//! # use std::sync::Arc;
//! # async fn run() -> bookbinder::error::Result<()> {
//! let settings = Settings::default();
//! let pipeline = Pipeline::builder()
//!     .transcoder(Arc::new(FfmpegTranscoder::new(&settings.conversion.ffmpeg_path)) as Arc<dyn Transcoder>)
//!     .tagger(Arc::new(BeetsTagger::new(settings.tagging.clone())) as Arc<dyn Tagger>)
//!     .settings(settings)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metadata::{MetadataResolver, TagReader, default_tag_readers};
use crate::path_utils::{
    PathSanitizer, copy_dir_all, find_cover_image, job_key, list_audio_files, remove_dir_if_exists,
};
use crate::planner::{OutputPathPlanner, PlannedOutput};
use crate::tools::{
    BeetsTagger, EncodingOptions, FfmpegTranscoder, TagRequest, Tagger, TranscodeRequest,
    Transcoder, remove_file_quietly,
};
use crate::types::{BookDirectory, BookMetadata, JobOutcome, JobState, ProcessingJob};

type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

/// The book pipeline, built once and shared by every trigger.
#[derive(Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct Pipeline {
    /// Service settings. Only the directory, conversion, tagging and output
    /// sections are read here.
    pub settings: Arc<Settings>,

    pub transcoder: Arc<dyn Transcoder>,

    pub tagger: Arc<dyn Tagger>,

    /// Embedded tag readers, tried in order.
    #[builder(default = "default_tag_readers()")]
    pub tag_readers: Vec<Arc<dyn TagReader>>,

    #[builder(setter(skip), default)]
    in_flight: InFlight,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("tag_readers", &self.tag_readers.len())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// Exclusive claim on a source path. Released on drop.
struct InFlightClaim {
    registry: InFlight,
    path: PathBuf,
}

impl InFlightClaim {
    fn acquire(registry: &InFlight, path: &Path) -> Option<Self> {
        let mut active = registry.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(path.to_path_buf()) {
            return None;
        }
        Some(Self {
            registry: Arc::clone(registry),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.path);
    }
}

/// Runs `future` under `budget`, turning expiry into [`Error::Timeout`].
async fn with_budget<F>(tool: &str, budget: Duration, future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            tool: tool.to_string(),
            after: budget,
        }),
    }
}

/// Moves the finished file into the output tree without ever overwriting.
/// Returns `false` when the destination already existed.
async fn commit_no_overwrite(scratch_output: &Path, planned: &PlannedOutput) -> Result<bool> {
    let destination = planned.final_path();
    tokio::fs::create_dir_all(&planned.directory)
        .await
        .map_err(|source| Error::Commit {
            path: planned.directory.clone(),
            source,
        })?;

    match tokio::fs::hard_link(scratch_output, &destination).await {
        Ok(()) => return Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => log::debug!("Cannot link into {:?} ({}), copying", planned.directory, e),
    }

    let partial = planned
        .directory
        .join(format!(".{}.partial", planned.filename));
    if let Err(source) = tokio::fs::copy(scratch_output, &partial).await {
        remove_file_quietly(&partial).await;
        return Err(Error::Commit {
            path: partial,
            source,
        });
    }
    let linked = tokio::fs::hard_link(&partial, &destination).await;
    remove_file_quietly(&partial).await;

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(Error::Commit {
            path: destination,
            source,
        }),
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Builds a pipeline backed by ffmpeg and beets as configured in `settings`.
    pub fn with_external_tools(settings: Arc<Settings>) -> Result<Self> {
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::new(&settings.conversion.ffmpeg_path));
        let tagger: Arc<dyn Tagger> = Arc::new(BeetsTagger::new(settings.tagging.clone()));
        Ok(Pipeline::builder()
            .settings(settings)
            .transcoder(transcoder)
            .tagger(tagger)
            .build()?)
    }

    /// Number of books currently being processed.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn planner(&self) -> OutputPathPlanner {
        OutputPathPlanner::new(
            &self.settings.directories.output,
            &self.settings.output_structure,
        )
    }

    /// Processes one book directory end to end.
    ///
    /// Failures are logged with the stage they happened after and returned; the
    /// source directory is never removed on failure.
    ///
    /// # Arguments
    ///
    /// * `book` - A classified book directory from discovery
    ///
    /// # Returns
    ///
    /// * `Result<JobOutcome>` - How the job ended, or the error that stopped it
    pub async fn process(&self, book: BookDirectory) -> Result<JobOutcome> {
        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, &book.path) else {
            log::info!("{:?} is already being processed", book.path);
            return Ok(JobOutcome::AlreadyInFlight);
        };
        if !tokio::fs::try_exists(&book.path).await.unwrap_or(false) {
            log::debug!("{:?} no longer exists, nothing to do", book.path);
            return Ok(JobOutcome::SourceVanished);
        }

        let sanitizer = PathSanitizer::new(&self.settings.output_structure);
        let scratch = self
            .settings
            .directories
            .temp
            .join(job_key(&book.path, &sanitizer));
        let mut job = ProcessingJob::new(book.path.clone(), scratch);
        log::info!("Processing {:?}", job.source_path);

        match self.run(&mut job, &book).await {
            Ok(outcome) => {
                log::info!(
                    "Finished {:?} in {}s: {:?}",
                    job.source_path,
                    job.elapsed_secs(),
                    outcome
                );
                Ok(outcome)
            }
            Err(e) => {
                let stage = job.state;
                job.fail();
                log::error!(
                    "Processing {:?} failed after stage {}: {}",
                    job.source_path,
                    stage,
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(&self, job: &mut ProcessingJob, book: &BookDirectory) -> Result<JobOutcome> {
        let resolver = MetadataResolver::new(self.tag_readers.clone());
        let metadata = resolver
            .resolve(book)
            .await
            .ok_or_else(|| Error::NotABook(book.path.clone()))?;
        log::info!(
            "Resolved {:?} as '{}' by '{}'",
            job.source_path,
            metadata.album,
            metadata.artist
        );
        job.metadata = Some(metadata.clone());
        job.advance(JobState::MetadataExtracted)?;

        let planner = self.planner();
        let planned = planner.plan(&metadata, book.name());
        if planner.already_done(&planned) {
            job.advance(JobState::SkippedDuplicate)?;
            log::info!(
                "{:?} already exists, removing redundant source {:?}",
                planned.final_path(),
                job.source_path
            );
            if let Err(e) = remove_dir_if_exists(&job.source_path).await {
                log::warn!("Could not remove duplicate source: {}", e);
            }
            return Ok(JobOutcome::SkippedDuplicate(planned.final_path()));
        }

        self.stage(job).await?;
        job.advance(JobState::Staged)?;

        let mut metadata = metadata;
        if self.settings.tagging.active() {
            metadata = self.tag(job, book, &resolver, metadata).await;
            job.metadata = Some(metadata.clone());
            job.advance(JobState::Tagged)?;
        }

        // The destination stays the one the gate checked.
        let scratch_output = self.transcode(job, &metadata, &planned).await?;
        job.advance(JobState::Transcoded)?;

        let created = commit_no_overwrite(&scratch_output, &planned).await?;
        let final_path = planned.final_path();
        job.output_path = Some(final_path.clone());
        job.advance(JobState::Committed)?;
        if created {
            log::info!("Committed {:?}", final_path);
        } else {
            log::info!("{:?} was created concurrently, keeping the existing file", final_path);
        }

        self.clean_up(job).await;
        job.advance(JobState::CleanedUp)?;

        Ok(if created {
            JobOutcome::Committed(final_path)
        } else {
            JobOutcome::CommitRaced(final_path)
        })
    }

    /// Rebuilds the job's scratch directory and copies the source into it.
    async fn stage(&self, job: &ProcessingJob) -> Result<()> {
        let staging_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| Error::Staging { path, source }
        };

        match tokio::fs::remove_dir_all(&job.temp_path).await {
            Ok(()) => log::info!("Discarded stale scratch directory {:?}", job.temp_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(staging_error(&job.temp_path)(e)),
        }
        tokio::fs::create_dir_all(&job.temp_path)
            .await
            .map_err(staging_error(&job.temp_path))?;

        let staged = job.staged_path();
        copy_dir_all(&job.source_path, &staged)
            .await
            .map_err(staging_error(&job.source_path))?;
        log::debug!("Staged {:?} into {:?}", job.source_path, staged);
        Ok(())
    }

    /// Runs the external tagger. Never fails the job; on any problem the
    /// current metadata is returned unchanged.
    async fn tag(
        &self,
        job: &ProcessingJob,
        book: &BookDirectory,
        resolver: &MetadataResolver,
        current: BookMetadata,
    ) -> BookMetadata {
        let staged = job.staged_path();
        let request = TagRequest {
            directory: staged.clone(),
            scratch_dir: job.temp_path.clone(),
        };

        let result = with_budget(
            "tagger",
            self.settings.tagging.timeout(),
            self.tagger.tag(&request),
        )
        .await;
        if let Err(e) = result {
            log::warn!(
                "Tagging {:?} failed, keeping existing metadata: {}",
                job.source_path,
                e
            );
            return current;
        }

        match resolver.reresolve(&staged, book).await {
            Some(updated) => {
                if updated != current {
                    log::info!(
                        "Tagging updated {:?} to '{}' by '{}'",
                        job.source_path,
                        updated.album,
                        updated.artist
                    );
                }
                updated
            }
            None => {
                log::warn!(
                    "No metadata after tagging {:?}, keeping existing metadata",
                    job.source_path
                );
                current
            }
        }
    }

    /// Merges the staged audio into a file inside the scratch directory.
    async fn transcode(
        &self,
        job: &ProcessingJob,
        metadata: &BookMetadata,
        planned: &PlannedOutput,
    ) -> Result<PathBuf> {
        let staged = job.staged_path();
        let audio_files = list_audio_files(&staged).await?;
        if audio_files.is_empty() {
            return Err(Error::Transcode {
                path: staged,
                reason: "Staged copy has no audio files".to_string(),
            });
        }

        let conversion = &self.settings.conversion;
        let output_path = job.temp_path.join(&planned.filename);
        let request = TranscodeRequest {
            audio_files,
            metadata: metadata.clone(),
            output_path: output_path.clone(),
            options: EncodingOptions::from_config(conversion),
            cover: find_cover_image(&staged).await,
            scratch_dir: job.temp_path.clone(),
        };

        let result = with_budget(
            "transcoder",
            conversion.transcode_timeout(),
            self.transcoder.transcode(&request),
        )
        .await;
        if let Err(e) = result {
            remove_file_quietly(&output_path).await;
            return Err(e);
        }

        match tokio::fs::try_exists(&output_path).await {
            Ok(true) => Ok(output_path),
            _ => Err(Error::Transcode {
                path: output_path,
                reason: "Transcoder reported success but wrote no file".to_string(),
            }),
        }
    }

    async fn clean_up(&self, job: &ProcessingJob) {
        for dir in [&job.source_path, &job.temp_path] {
            if let Err(e) = remove_dir_if_exists(dir).await {
                log::warn!("Cleanup of {:?} failed: {}", dir, e);
            }
        }
    }
}

impl PipelineBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(settings) = &self.settings {
            settings.validate().map_err(|e| e.to_string())?;
        }
        if let Some(readers) = &self.tag_readers {
            if readers.is_empty() {
                return Err("At least one tag reader is required".to_string());
            }
        }
        Ok(())
    }
}
