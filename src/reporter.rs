//! Periodic rendering of download progress on its own task.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Destination of rendered progress lines.
pub trait ProgressSink: Send + 'static {
    fn update(&mut self, line: String);

    /// Called once after the last update.
    fn finish(&mut self) {}
}

/// Single reserved terminal line backed by an indicatif spinner.
pub struct TerminalLine {
    bar: ProgressBar,
}

impl TerminalLine {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }
}

impl ProgressSink for TerminalLine {
    fn update(&mut self, line: String) {
        self.bar.set_message(line);
        self.bar.tick();
    }

    fn finish(&mut self) {
        self.bar.finish_and_clear();
    }
}

pub struct ProgressReporter {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    /// Render `source()` into `sink` every `interval` until stopped.
    pub fn spawn<F, S>(source: F, mut sink: S, interval: Duration) -> Self
    where
        F: Fn() -> String + Send + 'static,
        S: ProgressSink,
    {
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => sink.update(source()),
                }
            }
            sink.finish();
        });

        Self {
            stop: Some(stop),
            task,
        }
    }

    /// Stop the reporter and wait until its task has exited.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Progress reporter ended abnormally: {}", e);
        }
    }
}
