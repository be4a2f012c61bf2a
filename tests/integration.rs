//! Integration tests for the bookbinder pipeline.
//!
//! These tests run whole jobs against real directory trees, with the external
//! tools replaced by the fakes from `common`.

use bookbinder::error::{Error, Result};
use bookbinder::path_utils::{PathSanitizer, job_key};
use bookbinder::prelude::*;
use bookbinder::service::Service;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{
    FakeTagger, FakeTranscoder, TEST_TIMEOUT, TranscodeBehavior, build_pipeline, cleanup,
    create_book, create_dummy_audio, files_below, setup_test_dirs, test_settings,
    write_sidecar_tags,
};

#[tokio::test]
async fn test_flat_untagged_book() -> Result<()> {
    let dirs = setup_test_dirs("flat_untagged").await;
    let source = dirs.input.join("Book One");
    create_book(&source, 3).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());

    let outcome = timeout(TEST_TIMEOUT, pipeline.process(detect(&source, &dirs.input)))
        .await
        .expect("Test timed out")?;

    let expected = dirs.output.join("Unknown Author").join("Book One").join("Book One.m4b");
    assert_eq!(outcome, JobOutcome::Committed(expected.clone()));
    assert!(expected.is_file());
    assert!(!source.exists(), "source should be removed after commit");
    assert!(files_below(&dirs.temp).is_empty(), "scratch should be removed");

    let request = &transcoder.requests()[0];
    let names: Vec<String> = request
        .audio_files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, ["01.mp3", "02.mp3", "03.mp3"]);
    assert_eq!(request.metadata.artist, "Unknown Author");
    assert_eq!(request.metadata.title, "Book One");

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_structured_tagged_book_and_rerun_skips() -> Result<()> {
    let dirs = setup_test_dirs("structured_rerun").await;
    let source = dirs.input.join("Stephen King").join("It");
    create_book(&source, 2).await?;
    write_sidecar_tags(&source, &[("artist", "Stephen King"), ("album", "It")]).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let mut settings = test_settings(&dirs);
    settings.tagging.enabled = false;
    let pipeline = build_pipeline(settings, transcoder.clone(), FakeTagger::failing());

    let expected = dirs.output.join("Stephen King").join("It").join("It.m4b");
    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(outcome, JobOutcome::Committed(expected.clone()));
    let first_body = tokio::fs::read(&expected).await?;

    // The source reappears, as if cleanup never happened.
    create_book(&source, 2).await?;
    write_sidecar_tags(&source, &[("artist", "Stephen King"), ("album", "It")]).await?;

    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(outcome, JobOutcome::SkippedDuplicate(expected.clone()));
    assert_eq!(transcoder.calls(), 1, "second run must not transcode");
    assert!(!source.exists(), "redundant source should be removed");
    assert_eq!(tokio::fs::read(&expected).await?, first_body);
    assert_eq!(files_below(&dirs.output).len(), 1);

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_structure_fills_artist_for_tagless_book() -> Result<()> {
    let dirs = setup_test_dirs("structure_fallback").await;
    let source = dirs.input.join("Jane Doe").join("My Book");
    create_book(&source, 1).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());
    pipeline.process(detect(&source, &dirs.input)).await?;

    let metadata = &transcoder.requests()[0].metadata;
    assert_eq!(metadata.artist, "Jane Doe");
    assert_eq!(metadata.title, "My Book");
    assert_eq!(metadata.album, "My Book");

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_transcode_timeout_keeps_source() -> Result<()> {
    let dirs = setup_test_dirs("transcode_timeout").await;
    let source = dirs.input.join("Slow Book");
    create_book(&source, 2).await?;

    let mut settings = test_settings(&dirs);
    settings.conversion.transcode_timeout_secs = Some(1);
    let pipeline = build_pipeline(
        settings,
        FakeTranscoder::new(TranscodeBehavior::Hang),
        FakeTagger::failing(),
    );

    let result = timeout(TEST_TIMEOUT, pipeline.process(detect(&source, &dirs.input)))
        .await
        .expect("Test timed out");
    assert!(matches!(result, Err(Error::Timeout { .. })), "got {:?}", result);
    assert!(source.join("01.mp3").exists());
    assert!(files_below(&dirs.output).is_empty(), "nothing may reach the output tree");
    assert_eq!(pipeline.in_flight_count(), 0);

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_transcode_failure_keeps_staged_copy() -> Result<()> {
    let dirs = setup_test_dirs("transcode_failure").await;
    let source = dirs.input.join("Broken Book");
    create_book(&source, 2).await?;

    let settings = test_settings(&dirs);
    let scratch = dirs
        .temp
        .join(job_key(&source, &PathSanitizer::new(&settings.output_structure)));
    let pipeline = build_pipeline(
        settings,
        FakeTranscoder::new(TranscodeBehavior::Fail),
        FakeTagger::failing(),
    );

    let result = pipeline.process(detect(&source, &dirs.input)).await;
    assert!(matches!(result, Err(Error::Transcode { .. })));
    assert!(source.join("02.mp3").exists());
    assert!(scratch.join("book").join("01.mp3").exists());
    assert!(!scratch.join("Broken Book.m4b").exists(), "partial output should be removed");
    assert!(files_below(&dirs.output).is_empty());

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_tagger_failure_still_produces_output() -> Result<()> {
    let dirs = setup_test_dirs("tagger_failure").await;
    let source = dirs.input.join("Book Two");
    create_book(&source, 2).await?;

    let tagger = FakeTagger::failing();
    let pipeline = build_pipeline(
        test_settings(&dirs),
        FakeTranscoder::new(TranscodeBehavior::Succeed),
        tagger.clone(),
    );

    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    let expected = dirs.output.join("Unknown Author").join("Book Two").join("Book Two.m4b");
    assert_eq!(outcome, JobOutcome::Committed(expected.clone()));
    assert_eq!(tagger.calls(), 1);
    assert!(expected.is_file());

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_tagging_result_supersedes_metadata() -> Result<()> {
    let dirs = setup_test_dirs("tagger_success").await;
    let source = dirs.input.join("unsorted rip");
    create_book(&source, 2).await?;

    let tagger = FakeTagger::succeeding(&[
        ("artist", "Ursula K. Le Guin"),
        ("album", "A Wizard of Earthsea"),
        ("year", "1968"),
    ]);
    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), tagger);

    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    // The destination is the one planned before tagging; the tags go into the file.
    let expected = dirs
        .output
        .join("Unknown Author")
        .join("unsorted rip")
        .join("unsorted rip.m4b");
    assert_eq!(outcome, JobOutcome::Committed(expected));

    let metadata = &transcoder.requests()[0].metadata;
    assert_eq!(metadata.artist, "Ursula K. Le Guin");
    assert_eq!(metadata.title, "A Wizard of Earthsea");
    assert_eq!(metadata.year.as_deref(), Some("1968"));

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_rerun_after_tagging_rename_skips() -> Result<()> {
    let dirs = setup_test_dirs("tagged_rerun").await;
    let source = dirs.input.join("Jane Doe").join("draft title");
    create_book(&source, 2).await?;

    let tagger = FakeTagger::succeeding(&[("album", "Final Title")]);
    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), tagger.clone());

    let expected = dirs
        .output
        .join("Jane Doe")
        .join("draft title")
        .join("draft title.m4b");
    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(outcome, JobOutcome::Committed(expected.clone()));
    assert_eq!(transcoder.requests()[0].metadata.album, "Final Title");

    // Cleanup was interrupted: the source is still there on the next scan.
    create_book(&source, 2).await?;

    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(outcome, JobOutcome::SkippedDuplicate(expected));
    assert_eq!(transcoder.calls(), 1, "finished book must not be transcoded again");
    assert_eq!(tagger.calls(), 1);
    assert!(!source.exists(), "redundant source should be removed");
    assert_eq!(files_below(&dirs.output).len(), 1);

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_tagging_timeout_keeps_prior_metadata() -> Result<()> {
    let dirs = setup_test_dirs("tagger_timeout").await;
    let source = dirs.input.join("Slow Provider");
    create_book(&source, 1).await?;

    let tagger = FakeTagger::hanging(&[("artist", "Half Written")]);
    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let mut settings = test_settings(&dirs);
    settings.tagging.timeout_secs = 1;
    let pipeline = build_pipeline(settings, transcoder.clone(), tagger.clone());

    let outcome = timeout(TEST_TIMEOUT, pipeline.process(detect(&source, &dirs.input)))
        .await
        .expect("Test timed out")?;
    let expected = dirs
        .output
        .join("Unknown Author")
        .join("Slow Provider")
        .join("Slow Provider.m4b");
    assert_eq!(outcome, JobOutcome::Committed(expected.clone()));
    assert!(expected.is_file());
    assert_eq!(tagger.calls(), 1);

    let metadata = &transcoder.requests()[0].metadata;
    assert_eq!(metadata.artist, "Unknown Author");
    assert_eq!(metadata.album, "Slow Provider");

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_vanished_source_is_quiet_no_op() -> Result<()> {
    let dirs = setup_test_dirs("vanished_source").await;
    let source = dirs.input.join("Terry Pratchett").join("Mort");
    create_book(&source, 1).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());

    // Author and book events both lead here; the first one finishes the book.
    let book = detect(&source, &dirs.input);
    assert!(matches!(
        pipeline.process(book.clone()).await?,
        JobOutcome::Committed(_)
    ));
    assert_eq!(pipeline.process(book).await?, JobOutcome::SourceVanished);
    assert_eq!(transcoder.calls(), 1);

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_tagging_disabled_skips_tagger() -> Result<()> {
    let dirs = setup_test_dirs("tagger_disabled").await;
    let source = dirs.input.join("Quiet Book");
    create_book(&source, 1).await?;

    let mut settings = test_settings(&dirs);
    settings.tagging.run_before_transcode = false;
    let tagger = FakeTagger::succeeding(&[("artist", "Someone Else")]);
    let pipeline = build_pipeline(
        settings,
        FakeTranscoder::new(TranscodeBehavior::Succeed),
        tagger.clone(),
    );

    pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(tagger.calls(), 0);
    assert!(dirs.output.join("Unknown Author").join("Quiet Book").exists());

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_triggers_transcode_once() -> Result<()> {
    let dirs = setup_test_dirs("concurrent_triggers").await;
    let source = dirs.input.join("Popular Book");
    create_book(&source, 2).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Slow(Duration::from_millis(200)));
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());

    let book = detect(&source, &dirs.input);
    let (first, second) = tokio::join!(pipeline.process(book.clone()), pipeline.process(book));

    let outcomes = [first?, second?];
    assert_eq!(transcoder.calls(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Committed(_)))
            .count(),
        1
    );
    assert!(outcomes.contains(&JobOutcome::AlreadyInFlight));

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_stale_scratch_is_rebuilt() -> Result<()> {
    let dirs = setup_test_dirs("stale_scratch").await;
    let source = dirs.input.join("Retry Book");
    create_book(&source, 2).await?;

    let settings = test_settings(&dirs);
    let scratch = dirs
        .temp
        .join(job_key(&source, &PathSanitizer::new(&settings.output_structure)));
    // Leftovers of an earlier, interrupted attempt.
    create_dummy_audio(&scratch.join("book").join("99 leftover.mp3")).await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(settings, transcoder.clone(), FakeTagger::failing());
    pipeline.process(detect(&source, &dirs.input)).await?;

    let staged: Vec<PathBuf> = transcoder.requests()[0]
        .audio_files
        .iter()
        .map(|p| PathBuf::from(p.file_name().unwrap()))
        .collect();
    assert_eq!(staged, [PathBuf::from("01.mp3"), PathBuf::from("02.mp3")]);
    assert!(!scratch.exists());

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_commit_never_overwrites() -> Result<()> {
    let dirs = setup_test_dirs("commit_race").await;
    let source = dirs.input.join("Contested");
    create_book(&source, 1).await?;

    let destination = dirs.output.join("Unknown Author").join("Contested").join("Contested.m4b");
    let pipeline = build_pipeline(
        test_settings(&dirs),
        FakeTranscoder::new(TranscodeBehavior::Race(destination.clone())),
        FakeTagger::failing(),
    );

    let outcome = pipeline.process(detect(&source, &dirs.input)).await?;
    assert_eq!(outcome, JobOutcome::CommitRaced(destination.clone()));
    assert_eq!(tokio::fs::read(&destination).await?, b"written elsewhere");
    assert_eq!(files_below(&dirs.output).len(), 1, "no partial file may remain");

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_directory_without_audio_is_not_a_book() -> Result<()> {
    let dirs = setup_test_dirs("not_a_book").await;
    let source = dirs.input.join("Scans");
    tokio::fs::create_dir_all(&source).await?;
    tokio::fs::write(source.join("cover.jpg"), b"jpeg").await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());

    let result = pipeline.process(detect(&source, &dirs.input)).await;
    assert!(matches!(result, Err(Error::NotABook(_))));
    assert!(source.join("cover.jpg").exists());
    assert_eq!(transcoder.calls(), 0);

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_cover_is_forwarded() -> Result<()> {
    let dirs = setup_test_dirs("cover_forwarded").await;
    let source = dirs.input.join("Illustrated");
    create_book(&source, 1).await?;
    tokio::fs::write(source.join("art.png"), b"png").await?;
    tokio::fs::write(source.join("folder.jpg"), b"jpeg").await?;

    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline(test_settings(&dirs), transcoder.clone(), FakeTagger::failing());
    pipeline.process(detect(&source, &dirs.input)).await?;

    let cover = transcoder.requests()[0].cover.clone().expect("cover expected");
    assert_eq!(cover.file_name().unwrap(), "folder.jpg");

    cleanup(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_service_run_once_processes_every_book() -> Result<()> {
    let dirs = setup_test_dirs("service_once").await;
    create_book(&dirs.input.join("Flat Book"), 2).await?;
    create_book(&dirs.input.join("Jane Doe").join("Nested Book"), 1).await?;

    let settings = Arc::new(test_settings(&dirs));
    let transcoder = FakeTranscoder::new(TranscodeBehavior::Succeed);
    let pipeline = build_pipeline((*settings).clone(), transcoder.clone(), FakeTagger::failing());
    let service = Service::new(settings, pipeline).await?;

    timeout(TEST_TIMEOUT, service.run_once())
        .await
        .expect("Test timed out")?;

    assert_eq!(transcoder.calls(), 2);
    assert_eq!(
        files_below(&dirs.output),
        [
            PathBuf::from("Jane Doe/Nested Book/Nested Book.m4b"),
            PathBuf::from("Unknown Author/Flat Book/Flat Book.m4b"),
        ]
    );
    assert_eq!(service.stats().committed.load(Ordering::Relaxed), 2);

    cleanup(&dirs).await;
    Ok(())
}
