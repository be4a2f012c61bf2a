//! Bookbinder - Audiobook Merging Service
//!
//! This crate watches an input directory for audiobooks delivered as one audio
//! file per chapter, works out their metadata and merges each book into a single
//! tagged M4B file under `output/Author/Book/Book.m4b`.
//!
//! # Getting Started
//!
//! The pipeline can be driven directly for a single directory. The service in
//! [`service`] wraps the same call with an initial scan and a filesystem watch.
//!
//! ```rust,no_run
//! use bookbinder::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bookbinder::error::Result<()> {
//!     let settings = Arc::new(Settings::load(Path::new("converter.yaml"))?);
//!     let pipeline = Pipeline::with_external_tools(Arc::clone(&settings))?;
//!
//!     let input_root = settings.directories.input.clone();
//!     let book = detect(&input_root.join("Stephen King").join("It"), &input_root);
//!     match pipeline.process(book).await? {
//!         JobOutcome::Committed(path) => println!("Wrote {:?}", path),
//!         other => println!("Nothing written: {:?}", other),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod path_utils;
pub mod pipeline;
pub mod planner;
pub mod service;
pub mod structure;
pub mod tools;
pub mod types;

pub use pipeline::{Pipeline, PipelineBuilder};

pub use types::{
    BookDirectory, BookMetadata, JobOutcome, JobState, LayoutKind, ProcessingJob, QualityProfile,
    TagRecord,
};

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to configure and drive the pipeline with a single
/// `use bookbinder::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        BookDirectory, BookMetadata, JobOutcome, JobState, LayoutKind, ProcessingJob,
        QualityProfile, TagRecord,
    };
    pub use crate::config::Settings;
    pub use crate::discovery::BookDiscovery;
    pub use crate::metadata::{MetadataResolver, TagReader};
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::planner::{OutputPathPlanner, PlannedOutput};
    pub use crate::structure::detect;
    pub use crate::tools::{
        BeetsTagger, FfmpegTranscoder, TagRequest, Tagger, TranscodeRequest, Transcoder,
    };
}
