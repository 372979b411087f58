//! Per-run error, warning and skip ledger.
//!
//! A [`Summary`] is owned by one job execution and shared by reference with
//! every resource worker of that job. Counters are atomic; lists are
//! append-only behind a mutex, so concurrent workers never lose an entry.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Category of a recorded warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningCategory {
    /// A whole resource failed and was skipped.
    Resource,
    /// A page could not be fetched or parsed.
    Paging,
    /// No usable identifier could be extracted from a record.
    Identifier,
    /// A mapper failed to build a document.
    Mapping,
    /// A geometry could not be parsed or transformed.
    Geometry,
    /// The bulk sink rejected a submission.
    Sink,
}

impl WarningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCategory::Resource => "resource",
            WarningCategory::Paging => "paging",
            WarningCategory::Identifier => "identifier",
            WarningCategory::Mapping => "mapping",
            WarningCategory::Geometry => "geometry",
            WarningCategory::Sink => "sink",
        }
    }
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(category, message)` warning entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub category: WarningCategory,
    pub message: String,
}

/// Thread-safe ledger for one harvest run.
#[derive(Debug, Default)]
pub struct Summary {
    num_docs: AtomicUsize,
    indexed: AtomicUsize,
    skipped_docs: Mutex<Vec<String>>,
    warnings: Mutex<Vec<Warning>>,
    app_errors: Mutex<Vec<String>>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one successfully mapped document.
    pub fn record_doc(&self) -> usize {
        self.num_docs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts documents accepted by the sink.
    pub fn record_indexed(&self, count: usize) {
        self.indexed.fetch_add(count, Ordering::Relaxed);
    }

    /// Marks a record as skipped.
    pub fn skip(&self, identifier: impl Into<String>) {
        if let Ok(mut skipped) = self.skipped_docs.lock() {
            skipped.push(identifier.into());
        }
    }

    /// Appends a warning.
    pub fn warn(&self, category: WarningCategory, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(category = category.as_str(), "{}", message);
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(Warning { category, message });
        }
    }

    /// Appends an application error. Any entry tells the caller to roll back.
    pub fn app_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        if let Ok(mut errors) = self.app_errors.lock() {
            errors.push(message);
        }
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs.load(Ordering::Relaxed)
    }

    pub fn has_app_errors(&self) -> bool {
        self.app_errors.lock().map(|e| !e.is_empty()).unwrap_or(true)
    }

    /// Counts warnings of one category.
    pub fn warning_count(&self, category: WarningCategory) -> usize {
        self.warnings
            .lock()
            .map(|w| w.iter().filter(|w| w.category == category).count())
            .unwrap_or(0)
    }

    /// Takes a serializable copy of the current state.
    pub fn snapshot(&self) -> SummaryReport {
        SummaryReport {
            num_docs: self.num_docs.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            skipped_docs: self
                .skipped_docs
                .lock()
                .map(|v| v.clone())
                .unwrap_or_default(),
            warnings: self.warnings.lock().map(|v| v.clone()).unwrap_or_default(),
            app_errors: self.app_errors.lock().map(|v| v.clone()).unwrap_or_default(),
        }
    }
}

/// Immutable snapshot of a [`Summary`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub num_docs: usize,
    pub indexed: usize,
    pub skipped_docs: Vec<String>,
    pub warnings: Vec<Warning>,
    pub app_errors: Vec<String>,
}

impl SummaryReport {
    pub fn skipped(&self) -> usize {
        self.skipped_docs.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn has_app_errors(&self) -> bool {
        !self.app_errors.is_empty()
    }
}

// =============================================================================
// Batch Harvest Types
// =============================================================================

/// Result of harvesting a single source in batch mode.
#[derive(Debug, Clone)]
pub struct SourceHarvestResult {
    pub source_name: String,
    pub source_url: String,
    /// Job report, present when the job reached a terminal state.
    pub report: Option<SummaryReport>,
    /// Number of documents mapped.
    pub count: usize,
    /// Error message if the job failed.
    pub error: Option<String>,
}

impl SourceHarvestResult {
    pub fn success(name: String, url: String, count: usize, report: SummaryReport) -> Self {
        Self {
            source_name: name,
            source_url: url,
            report: Some(report),
            count,
            error: None,
        }
    }

    pub fn failure(name: String, url: String, error: String, report: Option<SummaryReport>) -> Self {
        Self {
            source_name: name,
            source_url: url,
            report,
            count: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated results of a batch harvest.
#[derive(Debug, Clone, Default)]
pub struct BatchHarvestSummary {
    pub results: Vec<SourceHarvestResult>,
}

impl BatchHarvestSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: SourceHarvestResult) {
        self.results.push(result);
    }

    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Total documents mapped across successful sources.
    pub fn total_documents(&self) -> usize {
        self.results.iter().map(|r| r.count).sum()
    }

    pub fn total_sources(&self) -> usize {
        self.results.len()
    }
}
