//! Per-invocation driver: resolve, negotiate, select and download every URL.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::download::{DownloadManager, DownloadReport};
use crate::error::{DownloadError, PluginError};
use crate::plugins::{Overrides, Plugin, PluginManager, Policy};
use crate::reporter::{ProgressReporter, TerminalLine, REFRESH_INTERVAL};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub workers: usize,
    pub directory: PathBuf,
    pub zip: bool,
    /// Ignore handler-imposed worker limits.
    pub override_limits: bool,
}

#[derive(Debug)]
pub struct UrlOutcome {
    pub url: String,
    pub result: Result<DownloadReport, RunError>,
}

/// Process every URL. A failure only affects the URL it belongs to.
///
/// All option negotiation happens before the first download starts.
pub async fn run(
    pm: &mut PluginManager,
    urls: &[String],
    overrides: &Overrides,
    policy: Policy,
    settings: &Settings,
) -> Vec<UrlOutcome> {
    let mut outcomes = Vec::with_capacity(urls.len());
    let mut ready = Vec::new();

    for candidates in pm.find_handlers(urls) {
        if candidates.is_empty() {
            error!("Found no handler for: {}", candidates.url);
            outcomes.push(UrlOutcome {
                url: candidates.url.clone(),
                result: Err(PluginError::NoHandler {
                    url: candidates.url,
                }
                .into()),
            });
            continue;
        }

        match pm.set_options(&candidates, overrides, policy) {
            Ok(()) => ready.push(candidates),
            Err(e) => {
                error!("Skipping {}: {}", candidates.url, e);
                outcomes.push(UrlOutcome {
                    url: candidates.url,
                    result: Err(e.into()),
                });
            }
        }
    }

    for candidates in ready {
        let result = match pm.select_plugin(&candidates) {
            Ok(plugin) => {
                if urls.len() > 1 {
                    info!("Processing URL: {}", candidates.url);
                }
                info!("Starting download using \"{}\"...", plugin.name());
                start_downloading(&candidates.url, plugin, settings)
                    .await
                    .map_err(RunError::from)
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(report) => {
                if report.failed() > 0 {
                    warn!("{} of {} downloads failed", report.failed(), report.total());
                }
                if let Some(reason) = &report.discovery_error {
                    warn!("Listing ended early: {}", reason);
                }
                if let Some(archive) = &report.archive {
                    info!("Archived downloads to {}", archive.display());
                }
                info!("Done! Got a total of {} downloads.", report.completed());
            }
            Err(e) => error!("{}: {}", candidates.url, e),
        }

        outcomes.push(UrlOutcome {
            url: candidates.url,
            result,
        });
    }

    outcomes
}

async fn start_downloading(
    url: &str,
    plugin: Plugin,
    settings: &Settings,
) -> Result<DownloadReport, DownloadError> {
    let dm = DownloadManager::new(plugin, &settings.directory);
    debug!("Saving files to {}", dm.directory().display());

    let progress = dm.progress();
    let reporter = ProgressReporter::spawn(
        move || progress.snapshot().to_string(),
        TerminalLine::new(),
        REFRESH_INTERVAL,
    );

    let result = dm
        .download(url, settings.workers, settings.zip, settings.override_limits)
        .await;
    reporter.stop().await;

    debug!("Final progress: {}", dm.progress_string());
    result
}
