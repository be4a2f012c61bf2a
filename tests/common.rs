//! Common test utilities for the bookbinder crate.
//!
//! Provides unique scratch trees under `tests/tmp`, dummy chapter files, and
//! in-process stand-ins for the transcoder, the tagger and the tag readers, so
//! no test needs ffmpeg or beets.

use async_trait::async_trait;
use bookbinder::config::Settings;
use bookbinder::error::{Error, Result};
use bookbinder::metadata::TagReader;
use bookbinder::pipeline::Pipeline;
use bookbinder::tools::{TagRequest, Tagger, TranscodeRequest, Transcoder};
use bookbinder::types::TagRecord;
use lofty::config::WriteOptions;
use lofty::id3::v1::Id3v1Tag;
use lofty::id3::v2::Id3v2Tag;
use lofty::tag::{Accessor, TagExt};
use rand::{Rng, distributions::Alphanumeric};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the sidecar file read by [`SidecarTagReader`].
#[allow(dead_code)]
pub const SIDECAR_NAME: &str = "tags.txt";

#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub temp: PathBuf,
}

/// Creates a fresh, uniquely named tree with input, output and temp roots.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let base = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }

    let dirs = TestDirs {
        input: base.join("input"),
        output: base.join("output"),
        temp: base.join("temp"),
        base,
    };
    for dir in [&dirs.input, &dirs.output, &dirs.temp] {
        fs::create_dir_all(dir).await.unwrap();
    }
    dirs
}

/// Settings pointing at `dirs`, with short timeouts and no settle delay.
#[allow(dead_code)]
pub fn test_settings(dirs: &TestDirs) -> Settings {
    let mut settings = Settings::default();
    settings.directories.input = dirs.input.clone();
    settings.directories.output = dirs.output.clone();
    settings.directories.temp = dirs.temp.clone();
    settings.conversion.jobs = 2;
    settings.conversion.transcode_timeout_secs = Some(10);
    settings.tagging.timeout_secs = 5;
    settings.watch.settle_delay_secs = 0;
    settings.logging.file = None;
    settings
}

/// Writes a few bytes that carry an audio extension but no parseable tags.
#[allow(dead_code)]
pub async fn create_dummy_audio(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, b"not really audio").await?;
    Ok(())
}

/// Creates `dir` with chapter files `01.mp3`..`NN.mp3`.
#[allow(dead_code)]
pub async fn create_book(dir: &Path, chapters: usize) -> Result<()> {
    for i in 1..=chapters {
        create_dummy_audio(&dir.join(format!("{:02}.mp3", i))).await?;
    }
    Ok(())
}

/// Writes `frames` silent MPEG-1 Layer III frames (128 kbit/s, 44.1 kHz), enough
/// for lofty to parse the file as real MP3 audio.
#[allow(dead_code)]
pub async fn create_mpeg_audio(path: &Path, frames: usize) -> Result<()> {
    const HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
    const FRAME_LEN: usize = 417;

    let mut data = Vec::with_capacity(frames * FRAME_LEN);
    for _ in 0..frames {
        data.extend_from_slice(&HEADER);
        data.resize(data.len() + FRAME_LEN - HEADER.len(), 0);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, data).await?;
    Ok(())
}

/// Embeds an ID3v2 tag with the given fields into `path`.
#[allow(dead_code)]
pub fn write_id3v2(
    path: &Path,
    title: Option<&str>,
    artist: Option<&str>,
    album: Option<&str>,
    year: Option<u32>,
) -> Result<()> {
    let mut tag = Id3v2Tag::default();
    if let Some(title) = title {
        tag.set_title(title.to_string());
    }
    if let Some(artist) = artist {
        tag.set_artist(artist.to_string());
    }
    if let Some(album) = album {
        tag.set_album(album.to_string());
    }
    if let Some(year) = year {
        tag.set_year(year);
    }
    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::from(e.to_string()))
}

/// Appends an ID3v1 tag carrying only artist and album to `path`.
#[allow(dead_code)]
pub fn write_id3v1(path: &Path, artist: &str, album: &str) -> Result<()> {
    let mut tag = Id3v1Tag::default();
    tag.set_artist(artist.to_string());
    tag.set_album(album.to_string());
    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::from(e.to_string()))
}

/// Writes `key=value` pairs read back by [`SidecarTagReader`].
#[allow(dead_code)]
pub async fn write_sidecar_tags(dir: &Path, pairs: &[(&str, &str)]) -> Result<()> {
    let text: String = pairs
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect();
    fs::write(dir.join(SIDECAR_NAME), text).await?;
    Ok(())
}

/// Stands in for embedded tags: reads a `tags.txt` next to the audio file.
#[derive(Debug, Default)]
pub struct SidecarTagReader;

impl TagReader for SidecarTagReader {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn read(&self, path: &Path) -> Option<TagRecord> {
        let text = std::fs::read_to_string(path.parent()?.join(SIDECAR_NAME)).ok()?;
        let value = |key: &str| {
            text.lines()
                .filter_map(|line| line.split_once('='))
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        };
        Some(TagRecord::normalized(
            value("title"),
            value("artist"),
            value("album"),
            value("year"),
        ))
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum TranscodeBehavior {
    /// Writes a small output file.
    Succeed,
    /// Returns an error after writing a partial file.
    Fail,
    /// Never finishes on its own.
    Hang,
    /// Sleeps before succeeding.
    Slow(Duration),
    /// Creates `path` itself before succeeding, like a concurrent writer would.
    Race(PathBuf),
}

#[derive(Debug)]
pub struct FakeTranscoder {
    behavior: TranscodeBehavior,
    calls: AtomicUsize,
    requests: Mutex<Vec<TranscodeRequest>>,
}

#[allow(dead_code)]
impl FakeTranscoder {
    pub fn new(behavior: TranscodeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let body = format!("{} by {}", request.metadata.album, request.metadata.artist);

        match &self.behavior {
            TranscodeBehavior::Succeed => {}
            TranscodeBehavior::Fail => {
                fs::write(&request.output_path, b"partial").await?;
                return Err(Error::Transcode {
                    path: request.output_path.clone(),
                    reason: "fake encoder failure".to_string(),
                });
            }
            TranscodeBehavior::Hang => {
                fs::write(&request.output_path, b"partial").await?;
                std::future::pending::<()>().await;
            }
            TranscodeBehavior::Slow(delay) => tokio::time::sleep(*delay).await,
            TranscodeBehavior::Race(path) => {
                fs::create_dir_all(path.parent().unwrap()).await?;
                fs::write(path, b"written elsewhere").await?;
            }
        }

        fs::write(&request.output_path, body).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeTagger {
    /// Tags written into the staged copy on success; `None` makes the run fail.
    tags: Option<Vec<(String, String)>>,
    /// Write the tags, then never return.
    hang: bool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeTagger {
    fn with_tags(tags: &[(&str, &str)]) -> Self {
        Self {
            tags: Some(
                tags.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn succeeding(tags: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self::with_tags(tags))
    }

    /// Writes `tags` into the staged copy and then hangs until cancelled.
    pub fn hanging(tags: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::with_tags(tags)
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tagger for FakeTagger {
    async fn tag(&self, request: &TagRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(tags) = &self.tags else {
            return Err(Error::Tagging("provider unreachable".to_string()));
        };
        let pairs: Vec<(&str, &str)> = tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        write_sidecar_tags(&request.directory, &pairs).await?;
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Builds a pipeline over the fakes, reading tags from sidecar files.
#[allow(dead_code)]
pub fn build_pipeline(
    settings: Settings,
    transcoder: Arc<FakeTranscoder>,
    tagger: Arc<FakeTagger>,
) -> Pipeline {
    Pipeline::builder()
        .settings(settings)
        .transcoder(transcoder as Arc<dyn Transcoder>)
        .tagger(tagger as Arc<dyn Tagger>)
        .tag_readers(vec![Arc::new(SidecarTagReader) as Arc<dyn TagReader>])
        .build()
        .unwrap()
}

/// Lists every file below `dir`, relative to it, sorted.
#[allow(dead_code)]
pub fn files_below(dir: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

/// Removes a test tree.
#[allow(dead_code)]
pub async fn cleanup(dirs: &TestDirs) {
    let _ = fs::remove_dir_all(&dirs.base).await;
}
