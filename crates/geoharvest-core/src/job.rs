//! Harvest job settings, coordinator states and job results.
//!
//! Jobs flow through these states:
//! ```text
//! init → discover → crawl → flush → done
//!   ↓        ↓         ↓       ↓
//!   └────────┴─────────┴───────┴──→ failed
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{HarvestConfig, ProtocolType, SourceEntry};
use crate::summary::SummaryReport;

// =============================================================================
// Job State
// =============================================================================

/// State of the harvest coordinator for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Resolving the catalog and building the protocol client.
    Init,
    /// Fetching and validating the capability document.
    Discover,
    /// Crawling resources page by page.
    Crawl,
    /// Flushing the bulk sink.
    Flush,
    /// Finished; the summary may still carry warnings.
    Done,
    /// Aborted on a systemic error.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Init => "init",
            JobState::Discover => "discover",
            JobState::Crawl => "crawl",
            JobState::Flush => "flush",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// Error type for parsing JobState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStateError(String);

impl std::fmt::Display for ParseJobStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job state: {}", self.0)
    }
}

impl std::error::Error for ParseJobStateError {}

impl std::str::FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(JobState::Init),
            "discover" => Ok(JobState::Discover),
            "crawl" => Ok(JobState::Crawl),
            "flush" => Ok(JobState::Flush),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            _ => Err(ParseJobStateError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Harvest Job
// =============================================================================

/// Static basic-auth credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Glob patterns over record identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierRules {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Immutable settings for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestJob {
    /// Name used in logs and reports.
    pub name: String,
    pub protocol: ProtocolType,
    pub source_url: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<String>,
    pub page_size: usize,
    pub concurrency: usize,
    pub rules: IdentifierRules,
    pub dry_run: bool,
    pub catalog_id: String,
    /// Kind used to rank duplicates during reconciliation.
    pub source_kind: String,
    pub language: String,
    /// CRS assumed for geometries that do not name one.
    pub default_crs: Option<String>,
    /// Protocol-specific record filter.
    pub filter: Option<String>,
}

impl HarvestJob {
    /// Creates a job with defaults for everything but protocol and URL.
    pub fn new(name: impl Into<String>, protocol: ProtocolType, source_url: impl Into<String>) -> Self {
        let name = name.into();
        let defaults = HarvestConfig::default();
        Self {
            catalog_id: name.clone(),
            name,
            protocol,
            source_url: source_url.into(),
            credentials: None,
            proxy: None,
            page_size: defaults.page_size,
            concurrency: defaults.concurrency,
            rules: IdentifierRules::default(),
            dry_run: false,
            source_kind: "catalog".to_string(),
            language: "en".to_string(),
            default_crs: None,
            filter: None,
        }
    }

    /// Builds a job from a configured source, filling gaps from `defaults`.
    pub fn from_source(source: &SourceEntry, defaults: &HarvestConfig) -> Self {
        let credentials = match (&source.username, &source.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            name: source.name.clone(),
            protocol: source.protocol,
            source_url: source.url.clone(),
            credentials,
            proxy: source.proxy.clone(),
            page_size: source.page_size.unwrap_or(defaults.page_size).max(1),
            concurrency: source.max_concurrent.unwrap_or(defaults.concurrency).max(1),
            rules: IdentifierRules {
                allow: source.allow.clone(),
                deny: source.deny.clone(),
            },
            dry_run: source.dry_run,
            catalog_id: source.catalog_id().to_string(),
            source_kind: source.source_kind().to_string(),
            language: source.language().to_string(),
            default_crs: source.crs.clone(),
            filter: source.filter.clone(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rules(mut self, rules: IdentifierRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_catalog(mut self, catalog_id: impl Into<String>) -> Self {
        self.catalog_id = catalog_id.into();
        self
    }

    pub fn with_source_kind(mut self, kind: impl Into<String>) -> Self {
        self.source_kind = kind.into();
        self
    }
}

// =============================================================================
// Harvest Result
// =============================================================================

/// Outcome of one coordinator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    /// Terminal state reached.
    pub state: JobState,
    /// Number of documents mapped.
    pub count: usize,
    pub summary: SummaryReport,
    /// True if the run stopped early on a cancellation request.
    pub cancelled: bool,
    /// The systemic error that failed the job, if any.
    pub error: Option<String>,
}

impl HarvestResult {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Done && !self.summary.has_app_errors()
    }

    /// Returns true if the caller should discard the writes of this run.
    pub fn requires_rollback(&self) -> bool {
        self.state == JobState::Failed || self.summary.has_app_errors()
    }
}
