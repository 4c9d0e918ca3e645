//! Live aggregate state of a download run.
//!
//! Workers write through atomics and a short-held status lock. Readers take a
//! [`ProgressSnapshot`], loading the terminal tallies before `discovered` so a
//! snapshot never shows more finished items than discovered ones.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::utils::{format_bytes, format_number};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Fetching(String),
    Finished,
}

#[derive(Debug)]
pub struct Progress {
    handler: &'static str,
    discovered: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    active: AtomicUsize,
    bytes: AtomicU64,
    discovering: AtomicBool,
    started: Instant,
    workers: Mutex<Vec<WorkerStatus>>,
}

impl Progress {
    pub fn new(handler: &'static str) -> Self {
        Self {
            handler,
            discovered: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
            discovering: AtomicBool::new(true),
            started: Instant::now(),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, Vec<WorkerStatus>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start_workers(&self, count: usize) {
        *self.workers() = vec![WorkerStatus::Idle; count];
    }

    pub(crate) fn item_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn discovery_finished(&self) {
        self.discovering.store(false, Ordering::Release);
    }

    pub(crate) fn item_started(&self, worker: usize, name: &str) {
        self.active.fetch_add(1, Ordering::Release);
        if let Some(status) = self.workers().get_mut(worker) {
            *status = WorkerStatus::Fetching(name.to_string());
        }
    }

    pub(crate) fn item_finished(&self, worker: usize, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Release);
        } else {
            self.failed.fetch_add(1, Ordering::Release);
        }
        self.active.fetch_sub(1, Ordering::Release);
        if let Some(status) = self.workers().get_mut(worker) {
            *status = WorkerStatus::Idle;
        }
    }

    pub(crate) fn worker_finished(&self, worker: usize) {
        if let Some(status) = self.workers().get_mut(worker) {
            *status = WorkerStatus::Finished;
        }
    }

    /// Counter handlers add freshly written bytes to.
    pub(crate) fn bytes(&self) -> &AtomicU64 {
        &self.bytes
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        let active = self.active.load(Ordering::Acquire);
        let discovering = self.discovering.load(Ordering::Acquire);
        let discovered = self.discovered.load(Ordering::Acquire);

        ProgressSnapshot {
            handler: self.handler,
            discovered,
            completed,
            failed,
            active,
            bytes: self.bytes.load(Ordering::Relaxed),
            discovering,
            elapsed: self.started.elapsed(),
            workers: self.workers().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub handler: &'static str,
    pub discovered: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
    pub bytes: u64,
    pub discovering: bool,
    pub elapsed: Duration,
    pub workers: Vec<WorkerStatus>,
}

impl ProgressSnapshot {
    /// Average bytes per second since the run started.
    pub fn throughput(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes as f64 / secs) as u64
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{}{} done",
            self.handler,
            format_number(self.completed as u64),
            format_number(self.discovered as u64),
            if self.discovering { "+" } else { "" },
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", format_number(self.failed as u64))?;
        }
        write!(
            f,
            ", {} active | {} @ {}/s",
            self.active,
            format_bytes(self.bytes),
            format_bytes(self.throughput())
        )
    }
}
