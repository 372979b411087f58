//! Progress reporting for harvest jobs.
//!
//! The coordinator emits [`HarvestEvent`]s through a [`ProgressReporter`] so
//! that the CLI can log, a server could stream, and tests can record, without
//! the engine knowing which.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, info, warn};

use crate::job::JobState;
use crate::summary::{BatchHarvestSummary, SummaryReport};

// =============================================================================
// Harvest Events
// =============================================================================

/// Events emitted while a job or batch runs.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// A batch of sources is starting.
    BatchStarted { total_sources: usize },
    /// A job is starting.
    JobStarted {
        source_index: usize,
        total_sources: usize,
        source_name: &'a str,
        source_url: &'a str,
    },
    /// The coordinator moved to a new state.
    StateChanged { source_name: &'a str, state: JobState },
    /// Discovery finished.
    ResourcesDiscovered { source_name: &'a str, count: usize },
    /// A resource crawl started.
    ResourceStarted { resource: &'a str },
    /// A page was fetched.
    PageFetched {
        resource: &'a str,
        start_position: usize,
        records: usize,
        matched: Option<usize>,
    },
    /// One more record was mapped. `done` and `total` never decrease.
    Progress { done: usize, total: usize },
    /// A resource finished all its pages.
    ResourceCompleted { resource: &'a str, records: usize },
    /// A resource failed; the job continues.
    ResourceFailed { resource: &'a str, error: &'a str },
    /// A job reached `Done`.
    JobCompleted {
        source_name: &'a str,
        count: usize,
        summary: &'a SummaryReport,
        cancelled: bool,
    },
    /// A job reached `Failed`.
    JobFailed { source_name: &'a str, error: &'a str },
    /// A batch stopped early on cancellation.
    BatchCancelled {
        completed_sources: usize,
        total_sources: usize,
    },
    /// A batch finished.
    BatchCompleted { summary: &'a BatchHarvestSummary },
}

/// Trait for receiving harvest events.
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::BatchStarted { total_sources } => {
                info!(total_sources, "Starting batch harvest");
            }
            HarvestEvent::JobStarted {
                source_index,
                total_sources,
                source_name,
                source_url,
            } => {
                info!(
                    source = source_name,
                    url = source_url,
                    "[{}/{}] Harvesting",
                    source_index + 1,
                    total_sources
                );
            }
            HarvestEvent::StateChanged { source_name, state } => {
                tracing::debug!(source = source_name, state = state.as_str(), "State changed");
            }
            HarvestEvent::ResourcesDiscovered { source_name, count } => {
                info!(source = source_name, resources = count, "Discovered resources");
            }
            HarvestEvent::ResourceStarted { resource } => {
                tracing::debug!(resource, "Crawling resource");
            }
            HarvestEvent::PageFetched {
                resource,
                start_position,
                records,
                matched,
            } => {
                tracing::debug!(resource, start_position, records, ?matched, "Page fetched");
            }
            HarvestEvent::Progress { done, total } => {
                // Every record would flood the log.
                if done % 100 == 0 || done == total {
                    info!(done, total, "Progress");
                }
            }
            HarvestEvent::ResourceCompleted { resource, records } => {
                info!(resource, records, "Resource completed");
            }
            HarvestEvent::ResourceFailed { resource, error } => {
                warn!(resource, error, "Resource failed, continuing with others");
            }
            HarvestEvent::JobCompleted {
                source_name,
                count,
                summary,
                cancelled,
            } => {
                info!(
                    source = source_name,
                    count,
                    skipped = summary.skipped(),
                    warnings = summary.warning_count(),
                    app_errors = summary.app_errors.len(),
                    cancelled,
                    "Harvest finished"
                );
            }
            HarvestEvent::JobFailed { source_name, error } => {
                error!(source = source_name, error, "Harvest failed");
            }
            HarvestEvent::BatchCancelled {
                completed_sources,
                total_sources,
            } => {
                warn!(completed_sources, total_sources, "Batch harvest cancelled");
            }
            HarvestEvent::BatchCompleted { summary } => {
                info!(
                    successful = summary.successful_count(),
                    failed = summary.failed_count(),
                    documents = summary.total_documents(),
                    "Batch harvest completed"
                );
            }
        }
    }
}

// =============================================================================
// Progress Tracker
// =============================================================================

/// Monotonic `(done, total)` counter shared by concurrent resource workers.
///
/// `total` starts from an estimate and is only ever revised upward; it never
/// falls below `done`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    done: AtomicUsize,
    total: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the total estimate to at least `total`.
    pub fn raise_total(&self, total: usize) {
        self.total.fetch_max(total, Ordering::SeqCst);
    }

    /// Adds `expected` records to the total estimate.
    pub fn add_expected(&self, expected: usize) {
        self.total.fetch_add(expected, Ordering::SeqCst);
    }

    /// Counts one finished record and returns the new `(done, total)` pair.
    pub fn advance(&self) -> (usize, usize) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.fetch_max(done, Ordering::SeqCst).max(done);
        (done, total)
    }

    pub fn current(&self) -> (usize, usize) {
        (
            self.done.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }
}
