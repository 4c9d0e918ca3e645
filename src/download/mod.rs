mod packager;
mod progress;

pub use packager::{archive_name, package};
pub use progress::{Progress, ProgressSnapshot, WorkerStatus};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{DownloadError, HandlerError};
use crate::plugins::{DownloadItem, FetchContext, ItemState, ItemStream, Plugin};

/// Outcome of one URL's download run.
#[derive(Debug)]
pub struct DownloadReport {
    pub url: String,
    pub handler: &'static str,
    /// Every claimed item, in discovery order.
    pub items: Vec<DownloadItem>,
    pub archive: Option<PathBuf>,
    /// Set when the item stream broke off before it was exhausted.
    pub discovery_error: Option<String>,
}

impl DownloadReport {
    /// Items that were downloaded successfully. This is the figure shown to
    /// the operator.
    pub fn completed(&self) -> usize {
        self.items.iter().filter(|i| i.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.is_failed()).count()
    }

    /// Items attempted, successful or not.
    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// Number of workers to run.
///
/// A handler ceiling caps the requested count unless `override_ceiling` is
/// set. Overriding is unsafe: the ceiling usually exists because the site
/// bans or throttles parallel clients.
pub fn effective_workers(requested: usize, ceiling: Option<usize>, override_ceiling: bool) -> usize {
    let requested = requested.max(1);
    match ceiling {
        Some(ceiling) if !override_ceiling => requested.min(ceiling.max(1)),
        _ => requested,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Feed {
    items: ItemStream,
    exhausted: bool,
    error: Option<String>,
}

/// State shared by all workers of a run.
struct Shared {
    plugin: Plugin,
    directory: PathBuf,
    progress: Arc<Progress>,
    feed: tokio::sync::Mutex<Feed>,
    slots: Mutex<Vec<DownloadItem>>,
}

impl Shared {
    /// Take the next undispatched item, recording it in discovery order.
    async fn claim(&self) -> Option<(usize, DownloadItem)> {
        let mut feed = self.feed.lock().await;
        if feed.exhausted {
            return None;
        }

        match feed.items.next().await {
            Some(Ok(mut item)) => {
                item.state = ItemState::InProgress;
                let mut slots = lock(&self.slots);
                let index = slots.len();
                slots.push(item.clone());
                self.progress.item_discovered();
                Some((index, item))
            }
            Some(Err(e)) => {
                warn!("{} stopped listing items: {}", self.plugin.name(), e);
                feed.exhausted = true;
                feed.error = Some(e.to_string());
                self.progress.discovery_finished();
                None
            }
            None => {
                feed.exhausted = true;
                self.progress.discovery_finished();
                None
            }
        }
    }

    fn settle(&self, index: usize, state: ItemState) {
        if let Some(slot) = lock(&self.slots).get_mut(index) {
            slot.state = state;
        }
    }

    fn relocate(&self, index: usize, path: PathBuf) {
        if let Some(slot) = lock(&self.slots).get_mut(index) {
            slot.path = path;
        }
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>) -> Result<(), DownloadError> {
    while let Some((index, item)) = shared.claim().await {
        shared.progress.item_started(id, &item.name);
        if !item.has_contained_path() {
            warn!(
                "Refusing to write {} outside {}",
                item.path.display(),
                shared.directory.display()
            );
            shared.settle(
                index,
                ItemState::Failed {
                    reason: format!("unsafe destination {}", item.path.display()),
                },
            );
            shared.progress.item_finished(id, false);
            continue;
        }

        let ctx = FetchContext::new(
            &shared.plugin.options,
            &shared.directory,
            shared.progress.bytes(),
        );

        match shared.plugin.handler.fetch(&item, &ctx).await {
            Ok(bytes) => {
                debug!(worker = id, bytes, "Downloaded {}", item.name);
                if let Some(path) = ctx.take_saved_path() {
                    shared.relocate(index, path);
                }
                shared.settle(index, ItemState::Done { bytes });
                shared.progress.item_finished(id, true);
            }
            Err(HandlerError::Fatal(reason)) => {
                shared.settle(
                    index,
                    ItemState::Failed {
                        reason: reason.clone(),
                    },
                );
                shared.progress.item_finished(id, false);
                return Err(DownloadError::WorkerFault(format!("{}: {}", item.name, reason)));
            }
            Err(e) => {
                warn!("Failed to download {}: {}", item, e);
                shared.settle(
                    index,
                    ItemState::Failed {
                        reason: e.to_string(),
                    },
                );
                shared.progress.item_finished(id, false);
            }
        }
    }

    shared.progress.worker_finished(id);
    Ok(())
}

fn join_fault(e: JoinError) -> DownloadError {
    if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        DownloadError::WorkerFault(format!("worker panicked: {message}"))
    } else {
        DownloadError::WorkerFault(e.to_string())
    }
}

/// Drives the download of one URL with one handler.
pub struct DownloadManager {
    plugin: Plugin,
    directory: PathBuf,
    progress: Arc<Progress>,
}

impl DownloadManager {
    pub fn new(plugin: Plugin, directory: impl Into<PathBuf>) -> Self {
        let progress = Arc::new(Progress::new(plugin.name()));
        Self {
            plugin,
            directory: directory.into(),
            progress,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub fn progress_string(&self) -> String {
        self.progress.snapshot().to_string()
    }

    pub async fn download(
        &self,
        url: &str,
        requested_workers: usize,
        zip: bool,
        override_ceiling: bool,
    ) -> Result<DownloadReport, DownloadError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let items = self
            .plugin
            .handler
            .resolve(url, &self.plugin.options)
            .await
            .map_err(|source| DownloadError::Resolve {
                handler: self.plugin.name().to_string(),
                url: url.to_string(),
                source,
            })?;

        let ceiling = self.plugin.concurrency_ceiling();
        let workers = effective_workers(requested_workers, ceiling, override_ceiling);
        match ceiling {
            Some(limit) if override_ceiling && limit < requested_workers => {
                warn!(
                    "Overriding the {} worker limit of {}, using {} workers",
                    self.plugin.name(),
                    limit,
                    workers
                );
            }
            Some(limit) if limit < requested_workers => {
                info!("{} limits downloads to {} worker(s)", self.plugin.name(), workers);
            }
            _ => {}
        }

        let shared = Arc::new(Shared {
            plugin: self.plugin.clone(),
            directory: self.directory.clone(),
            progress: self.progress.clone(),
            feed: tokio::sync::Mutex::new(Feed {
                items,
                exhausted: false,
                error: None,
            }),
            slots: Mutex::new(Vec::new()),
        });

        self.progress.start_workers(workers);
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(run_worker(id, shared.clone()));
        }

        let mut fault = None;
        while let Some(joined) = pool.join_next().await {
            let outcome = joined.map_err(join_fault).and_then(|r| r);
            if let Err(e) = outcome {
                if fault.is_none() {
                    error!("Aborting download of {}: {}", url, e);
                    pool.abort_all();
                    fault = Some(e);
                }
            }
        }
        if let Some(e) = fault {
            return Err(e);
        }

        let items = std::mem::take(&mut *lock(&shared.slots));
        let discovery_error = shared.feed.lock().await.error.take();
        let mut report = DownloadReport {
            url: url.to_string(),
            handler: self.plugin.name(),
            items,
            archive: None,
            discovery_error,
        };

        if zip {
            if report.completed() == 0 {
                warn!("Nothing to package for {}", url);
            } else {
                let name = archive_name(self.plugin.name(), url);
                report.archive = Some(package(&self.directory, name, &report.items).await?);
            }
        }

        Ok(report)
    }
}
