use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Lock-free progress counters plus the current status line of a load pipeline.
///
/// Cloning shares the same counters, so the pipeline and a display can hold one each.
#[derive(Clone)]
pub struct PipelineProgress {
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    status: Arc<Mutex<String>>,
    started_at: DateTime<Utc>,
    bar: Option<ProgressBar>,
}

/// Point-in-time view of the pipeline, for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: String,
    pub completed: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            status: Arc::new(Mutex::new(String::new())),
            started_at: Utc::now(),
            bar: None,
        }
    }

    /// Mirror status and counters onto a terminal progress bar
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = Some(bar);
        self
    }

    pub fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        if let Some(bar) = &self.bar {
            bar.set_message(message.clone());
        }
        if let Ok(mut status) = self.status.lock() {
            *status = message;
        }
    }

    pub fn status(&self) -> String {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Reset counters for a new stage of `total` units
    pub fn start_stage(&self, total: usize) {
        self.completed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        if let Some(bar) = &self.bar {
            bar.set_length(total as u64);
            bar.set_position(0);
        }
    }

    /// Increment completed counter and return new count
    pub fn increment_completed(&self) -> usize {
        let new_count = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        debug!("Progress: {}/{} units completed", new_count, self.total_count());
        new_count
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.total_count().saturating_sub(self.completed_count())
    }

    pub fn completion_percentage(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            0.0
        } else {
            (self.completed_count() as f64 / total as f64) * 100.0
        }
    }

    pub fn finish(&self, message: impl Into<String>) {
        let message = message.into();
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.clone());
        }
        self.set_status(message);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status(),
            completed: self.completed_count(),
            total: self.total_count(),
            started_at: self.started_at,
        }
    }

    /// Get a human-readable duration string
    pub fn elapsed_time(&self) -> String {
        let total_seconds = Utc::now().signed_duration_since(self.started_at).num_seconds();

        if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m {}s", total_seconds / 60, total_seconds % 60)
        } else {
            let hours = total_seconds / 3600;
            let minutes = (total_seconds % 3600) / 60;
            format!("{}h {}m", hours, minutes)
        }
    }
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self::new()
    }
}
