//! Discovery of book directories below the input root.
//!
//! Books are found two ways: a full scan at startup ([`BookDiscovery::scan_all`])
//! and filesystem events while the service runs ([`DirectoryWatcher`] feeding
//! [`BookDiscovery::on_directory_created`]). Both yield [`BookDirectory`] values
//! already classified by [`structure::detect`](crate::structure::detect).

use futures::stream::{self, Stream};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::path_utils::{has_audio_files, is_hidden_file};
use crate::structure::detect;
use crate::types::BookDirectory;

/// Capacity of the watcher event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Deepest accepted event path, counted in components below the input root.
const MAX_EVENT_DEPTH: usize = 2;

/// Finds book directories below one input root.
#[derive(Debug, Clone)]
pub struct BookDiscovery {
    input_root: PathBuf,
    settle_delay: Duration,
}

/// Lists the non-hidden subdirectories of `dir`, sorted by name. Read errors are
/// logged and yield an empty list.
async fn list_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read directory {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if is_hidden_file(&path) {
                    continue;
                }
                match entry.file_type().await {
                    Ok(file_type) if file_type.is_dir() => dirs.push(path),
                    Ok(_) => {}
                    Err(e) => log::warn!("Cannot stat {:?}: {}", path, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("Error while reading {:?}: {}", dir, e);
                break;
            }
        }
    }
    dirs.sort();
    dirs
}

struct ScanState {
    root: PathBuf,
    started: bool,
    flat: VecDeque<PathBuf>,
    authors: VecDeque<PathBuf>,
    books: VecDeque<PathBuf>,
}

impl BookDiscovery {
    pub fn new(input_root: impl Into<PathBuf>, settle_delay: Duration) -> Self {
        Self {
            input_root: input_root.into(),
            settle_delay,
        }
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    /// Walks the input root lazily: first every direct child holding audio, then
    /// every `Author/Book` grandchild holding audio.
    ///
    /// Each call starts a fresh walk. Hidden entries are skipped and unreadable
    /// directories are logged and treated as empty.
    ///
    /// # Returns
    ///
    /// * `impl Stream<Item = BookDirectory>` - Books in name order, flat ones first
    pub fn scan_all(&self) -> impl Stream<Item = BookDirectory> + Send + 'static {
        let state = ScanState {
            root: self.input_root.clone(),
            started: false,
            flat: VecDeque::new(),
            authors: VecDeque::new(),
            books: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            if !state.started {
                let top = list_subdirs(&state.root).await;
                state.flat = top.iter().cloned().collect();
                state.authors = top.into();
                state.started = true;
            }

            while let Some(dir) = state.flat.pop_front() {
                if has_audio_files(&dir).await {
                    let book = detect(&dir, &state.root);
                    return Some((book, state));
                }
            }

            loop {
                while let Some(dir) = state.books.pop_front() {
                    if has_audio_files(&dir).await {
                        let book = detect(&dir, &state.root);
                        return Some((book, state));
                    }
                }
                let author = state.authors.pop_front()?;
                state.books = list_subdirs(&author).await.into();
            }
        })
    }

    /// Depth of `path` below the input root, or `None` when it lies outside.
    fn depth_of(&self, path: &Path) -> Option<usize> {
        path.strip_prefix(&self.input_root)
            .ok()
            .map(|relative| relative.components().count())
    }

    /// Handles a directory that appeared below the input root.
    ///
    /// Waits for the settle delay, then returns the directory itself if it holds
    /// audio, or, for a fresh author folder directly under the root, each of its
    /// book subdirectories holding audio.
    pub async fn on_directory_created(&self, path: &Path) -> Vec<BookDirectory> {
        let depth = match self.depth_of(path) {
            Some(depth) if (1..=MAX_EVENT_DEPTH).contains(&depth) => depth,
            _ => {
                log::debug!("Ignoring event outside the book levels: {:?}", path);
                return Vec::new();
            }
        };
        let hidden = path
            .strip_prefix(&self.input_root)
            .map(|relative| relative.components().any(|c| is_hidden_file(Path::new(c.as_os_str()))))
            .unwrap_or(false);
        if hidden {
            return Vec::new();
        }

        tokio::time::sleep(self.settle_delay).await;

        if !tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Vec::new();
        }

        if has_audio_files(path).await {
            return vec![detect(path, &self.input_root)];
        }

        let mut books = Vec::new();
        if depth == 1 {
            for child in list_subdirs(path).await {
                if has_audio_files(&child).await {
                    books.push(detect(&child, &self.input_root));
                }
            }
        }
        if books.is_empty() {
            log::debug!("No audio found in new directory {:?}", path);
        }
        books
    }
}

/// Paths of interest in a raw notify event: created entries and rename
/// destinations.
pub fn convert_event(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

/// Recursive watch on the input root. Dropping it stops the watch.
pub struct DirectoryWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl DirectoryWatcher {
    /// Starts watching `root`. Candidate paths arrive on the returned channel;
    /// the notifier thread never does more than forward them.
    pub fn start(root: &Path, debounce: Duration) -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for path in convert_event(&event.event) {
                            if event_tx.blocking_send(path).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        log::error!("Watcher error: {:?}", error);
                    }
                }
            }
        })?;
        debouncer.watch(root, RecursiveMode::Recursive)?;
        log::info!("Watching {:?} for new books", root);

        Ok((
            Self {
                _debouncer: debouncer,
            },
            event_rx,
        ))
    }
}
