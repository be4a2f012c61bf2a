//! Long-running service: initial scan, directory watch and health heartbeat.
//!
//! Every discovered book is handed to [`Pipeline::process`] on its own task.
//! A semaphore with `conversion.jobs` permits bounds how many books are
//! processed at once.

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::discovery::{BookDiscovery, DirectoryWatcher};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::types::{BookDirectory, JobOutcome};

/// Running totals reported by the heartbeat.
#[derive(Debug, Default)]
pub struct JobStats {
    pub committed: AtomicUsize,
    pub skipped: AtomicUsize,
    pub failed: AtomicUsize,
}

impl JobStats {
    fn record(&self, outcome: &Result<JobOutcome>) {
        let counter = match outcome {
            Ok(JobOutcome::Committed(_) | JobOutcome::CommitRaced(_)) => &self.committed,
            Ok(JobOutcome::SkippedDuplicate(_)) => &self.skipped,
            Ok(JobOutcome::AlreadyInFlight | JobOutcome::SourceVanished) => return,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawns pipeline runs under the shared concurrency limit.
#[derive(Clone)]
struct Dispatcher {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    stats: Arc<JobStats>,
}

impl Dispatcher {
    fn spawn(&self, book: BookDirectory) -> JoinHandle<Result<()>> {
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            // Failures are logged by the pipeline and never stop the service.
            let outcome = pipeline.process(book).await;
            stats.record(&outcome);
            Result::Ok(())
        })
    }
}

pub struct Service {
    settings: Arc<Settings>,
    discovery: BookDiscovery,
    dispatcher: Dispatcher,
}

impl Service {
    /// Prepares the directory roots and resolves the input root to its
    /// canonical form, so scan and watch report identical paths.
    pub async fn new(settings: Arc<Settings>, pipeline: Pipeline) -> Result<Self> {
        let dirs = &settings.directories;
        for dir in [&dirs.input, &dirs.output, &dirs.temp] {
            tokio::fs::create_dir_all(dir).await?;
        }
        let input_root = tokio::fs::canonicalize(&dirs.input).await?;

        Ok(Self {
            discovery: BookDiscovery::new(input_root, settings.watch.settle_delay()),
            dispatcher: Dispatcher {
                pipeline: Arc::new(pipeline),
                permits: Arc::new(Semaphore::new(settings.conversion.jobs)),
                stats: Arc::new(JobStats::default()),
            },
            settings,
        })
    }

    pub fn stats(&self) -> &JobStats {
        &self.dispatcher.stats
    }

    async fn dispatch_scan(&self) -> Vec<JoinHandle<Result<()>>> {
        let mut handles = Vec::new();
        let mut books = std::pin::pin!(self.discovery.scan_all());
        while let Some(book) = books.next().await {
            log::debug!("Scan found {:?} ({:?})", book.path, book.kind);
            handles.push(self.dispatcher.spawn(book));
        }
        log::info!("Initial scan queued {} book(s)", handles.len());
        handles
    }

    /// Scans the input root once and waits for every queued book.
    pub async fn run_once(&self) -> Result<()> {
        for task in self.dispatch_scan().await {
            task.await??;
        }
        let stats = self.stats();
        log::info!(
            "Done: {} committed, {} skipped, {} failed",
            stats.committed.load(Ordering::Relaxed),
            stats.skipped.load(Ordering::Relaxed),
            stats.failed.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Scans, then watches the input root until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let (_watcher, mut events) = DirectoryWatcher::start(
            self.discovery.input_root(),
            self.settings.watch.debounce(),
        )?;

        let discovery = self.discovery.clone();
        let dispatcher = self.dispatcher.clone();
        let event_worker = tokio::spawn(async move {
            while let Some(path) = events.recv().await {
                let discovery = discovery.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    for book in discovery.on_directory_created(&path).await {
                        log::info!("New book detected: {:?}", book.path);
                        dispatcher.spawn(book);
                    }
                });
            }
            log::warn!("Watcher channel closed, no further events will be handled");
        });

        self.dispatch_scan().await;

        let mut heartbeat = tokio::time::interval(self.settings.watch.health_check_interval());
        heartbeat.tick().await;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    log::info!("Shutdown requested");
                    break;
                }
                _ = heartbeat.tick() => {
                    let stats = self.stats();
                    log::info!(
                        "Healthy: {} in flight, {} committed, {} skipped, {} failed",
                        self.dispatcher.pipeline.in_flight_count(),
                        stats.committed.load(Ordering::Relaxed),
                        stats.skipped.load(Ordering::Relaxed),
                        stats.failed.load(Ordering::Relaxed)
                    );
                }
            }
        }

        event_worker.abort();
        Ok(())
    }
}
