//! Harvest coordinator.
//!
//! The [`HarvestService`] runs one job end to end through
//! `init → discover → crawl → flush → done`, or ends in `failed` on a
//! systemic error. It owns the [`Summary`] of the run and decides job-level
//! success.
//!
//! # Architecture
//!
//! The service is generic over three traits:
//! - [`SourceClientFactory`] - builds the protocol client for a job
//! - [`BulkSink`] - receives mapped entities
//! - [`CatalogRegistry`] - resolves the job's catalog
//!
//! # Failure handling
//!
//! - A catalog, client or discovery failure fails the job.
//! - A failing resource is recorded as a `resource` warning; the other
//!   resources keep going. If every resource fails, an application error is
//!   recorded so the caller rolls back.
//! - Record-level mapping and geometry errors become warnings and the record
//!   is skipped.
//! - A flush failure fails the job.
//!
//! # Cancellation Support
//!
//! The `*_cancellable` methods accept a `CancellationToken` for graceful shutdown.
//! On cancellation:
//! - No new pages or resources are requested
//! - In-flight requests complete and their records are mapped
//! - The sink is still flushed
//! - The job ends in `done` with `cancelled` set in the result

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{HarvestConfig, SourceEntry};
use crate::error::AppError;
use crate::extract::RecordExtractor;
use crate::filter::IdentifierFilter;
use crate::job::{HarvestJob, HarvestResult, JobState};
use crate::model::Catalog;
use crate::paging::{PageStats, PagingCursor, ResourceOutcome, for_each_page, for_each_resource};
use crate::progress::{HarvestEvent, ProgressReporter, ProgressTracker, SilentReporter};
use crate::summary::{BatchHarvestSummary, SourceHarvestResult, Summary, WarningCategory};
use crate::traits::{
    BulkSink, CatalogRegistry, MappingContext, ResourceDescriptor, SourceClient,
    SourceClientFactory,
};

/// Service for running harvest jobs.
pub struct HarvestService<F, K, R>
where
    F: SourceClientFactory,
    K: BulkSink,
    R: CatalogRegistry,
{
    factory: F,
    sink: K,
    registry: R,
    config: HarvestConfig,
}

impl<F, K, R> Clone for HarvestService<F, K, R>
where
    F: SourceClientFactory + Clone,
    K: BulkSink + Clone,
    R: CatalogRegistry + Clone,
{
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            sink: self.sink.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F, K, R> HarvestService<F, K, R>
where
    F: SourceClientFactory,
    K: BulkSink,
    R: CatalogRegistry,
{
    /// Creates a new harvest service with default configuration.
    ///
    /// # Arguments
    ///
    /// * `factory` - Factory for creating protocol clients
    /// * `sink` - Destination of mapped entities
    /// * `registry` - Catalog lookup
    pub fn new(factory: F, sink: K, registry: R) -> Self {
        Self::with_config(factory, sink, registry, HarvestConfig::default())
    }

    /// Creates a harvest service whose batch jobs take their defaults from `config`.
    pub fn with_config(factory: F, sink: K, registry: R, config: HarvestConfig) -> Self {
        Self {
            factory,
            sink,
            registry,
            config,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Runs one job to a terminal state.
    ///
    /// Never returns an error: a failed job is reported through
    /// [`HarvestResult::state`] and the summary's application errors.
    pub async fn run(&self, job: &HarvestJob) -> HarvestResult {
        self.run_with_progress(job, &SilentReporter).await
    }

    /// Runs one job with progress reporting.
    pub async fn run_with_progress<P: ProgressReporter>(
        &self,
        job: &HarvestJob,
        reporter: &P,
    ) -> HarvestResult {
        self.run_cancellable(job, reporter, CancellationToken::new())
            .await
    }

    /// Runs one job with progress reporting and cancellation support.
    pub async fn run_cancellable<P: ProgressReporter>(
        &self,
        job: &HarvestJob,
        reporter: &P,
        cancel_token: CancellationToken,
    ) -> HarvestResult {
        let summary = Summary::new();

        enter(job, JobState::Init, reporter);
        let (catalog, client, filter) = match self.init(job).await {
            Ok(parts) => parts,
            Err(e) => return fail(job, &summary, e, reporter),
        };

        enter(job, JobState::Discover, reporter);
        let resources = match client.discover().await {
            Ok(resources) => resources,
            Err(e) => return fail(job, &summary, e, reporter),
        };
        reporter.report(HarvestEvent::ResourcesDiscovered {
            source_name: &job.name,
            count: resources.len(),
        });
        if resources.is_empty() {
            warn!(source = %job.name, "Source exposes no resources");
        }

        enter(job, JobState::Crawl, reporter);
        let context = MappingContext {
            source_name: job.name.clone(),
            source_kind: job.source_kind.clone(),
            catalog,
            language: job.language.clone(),
            default_crs: job.default_crs.clone(),
            harvested_at: Utc::now(),
        };
        let progress = ProgressTracker::new();
        let extractor =
            RecordExtractor::new(&client, &filter, &context, &summary, &progress, reporter);

        let client = &client;
        let extractor = &extractor;
        let progress = &progress;
        let cancel = &cancel_token;
        let outcomes = for_each_resource(&resources, job.concurrency, move |resource| {
            self.crawl_resource(client, resource, extractor, job, cancel, progress, reporter)
        })
        .await;

        let mut failed = 0;
        for (resource, outcome) in &outcomes {
            match outcome {
                Ok(outcome) => reporter.report(HarvestEvent::ResourceCompleted {
                    resource: &resource.name,
                    records: outcome.records,
                }),
                Err(e) => {
                    failed += 1;
                    let error = e.to_string();
                    summary.warn(
                        WarningCategory::Resource,
                        format!("Resource '{}' failed: {}", resource.name, error),
                    );
                    reporter.report(HarvestEvent::ResourceFailed {
                        resource: &resource.name,
                        error: &error,
                    });
                }
            }
        }
        if !resources.is_empty() && failed == resources.len() {
            summary.app_error(format!(
                "All {} resources of '{}' failed",
                resources.len(),
                job.name
            ));
        }
        let cancelled = cancel_token.is_cancelled();

        enter(job, JobState::Flush, reporter);
        if !job.dry_run {
            match self.sink.flush().await {
                Ok(written) => debug!(source = %job.name, written, "Sink flushed"),
                Err(e) => return fail(job, &summary, e, reporter),
            }
        }

        enter(job, JobState::Done, reporter);
        let report = summary.snapshot();
        reporter.report(HarvestEvent::JobCompleted {
            source_name: &job.name,
            count: report.num_docs,
            summary: &report,
            cancelled,
        });

        HarvestResult {
            state: JobState::Done,
            count: report.num_docs,
            summary: report,
            cancelled,
            error: None,
        }
    }

    async fn init(
        &self,
        job: &HarvestJob,
    ) -> Result<(Catalog, F::Client, IdentifierFilter), AppError> {
        let catalog = self
            .registry
            .get_catalog(&job.catalog_id)
            .await?
            .ok_or_else(|| AppError::CatalogNotFound(job.catalog_id.clone()))?;
        let filter = IdentifierFilter::from_rules(&job.rules)?;
        let client = self.factory.create(job)?;
        Ok((catalog, client, filter))
    }

    #[allow(clippy::too_many_arguments)]
    async fn crawl_resource<C, P>(
        &self,
        client: &C,
        resource: &ResourceDescriptor,
        extractor: &RecordExtractor<'_, C, P>,
        job: &HarvestJob,
        cancel: &CancellationToken,
        progress: &ProgressTracker,
        reporter: &P,
    ) -> Result<ResourceOutcome, AppError>
    where
        C: SourceClient,
        P: ProgressReporter,
    {
        if cancel.is_cancelled() {
            return Ok(ResourceOutcome {
                cancelled: true,
                ..Default::default()
            });
        }
        reporter.report(HarvestEvent::ResourceStarted {
            resource: &resource.name,
        });

        let sink = &self.sink;
        let cursor = PagingCursor::new(&resource.name, job.page_size);
        for_each_page(cursor, resource.supports_paging, cancel, move |cursor| async move {
            let page = client.fetch_page(resource, &cursor).await?;
            let records = page.records.len();
            let matched = page.number_matched;
            reporter.report(HarvestEvent::PageFetched {
                resource: &resource.name,
                start_position: cursor.start_position,
                records,
                matched,
            });

            match (cursor.start_position, matched) {
                (0, Some(n)) => progress.add_expected(n),
                (_, None) => progress.add_expected(records),
                _ => {}
            }
            if records == 0 && matched.is_some_and(|n| n > cursor.start_position) {
                extractor.summary().warn(
                    WarningCategory::Paging,
                    format!(
                        "Empty page at {} of '{}' although {} records are reported",
                        cursor.start_position,
                        resource.name,
                        matched.unwrap_or_default()
                    ),
                );
            }

            extractor
                .process_page(resource, page, sink, job.dry_run)
                .await;
            Ok(PageStats {
                records,
                number_matched: matched,
            })
        })
        .await
    }

    // =========================================================================
    // Batch Harvest
    // =========================================================================

    /// Harvests several configured sources one after the other.
    ///
    /// A failing source does not stop the batch.
    pub async fn batch_harvest(&self, sources: &[&SourceEntry]) -> BatchHarvestSummary {
        self.batch_harvest_with_progress(sources, &SilentReporter)
            .await
    }

    /// Harvests several sources with progress reporting.
    pub async fn batch_harvest_with_progress<P: ProgressReporter>(
        &self,
        sources: &[&SourceEntry],
        reporter: &P,
    ) -> BatchHarvestSummary {
        self.batch_harvest_with_progress_cancellable(
            sources,
            reporter,
            CancellationToken::new(), // never cancelled
        )
        .await
    }

    /// Harvests several sources with cancellation support.
    pub async fn batch_harvest_cancellable(
        &self,
        sources: &[&SourceEntry],
        cancel_token: CancellationToken,
    ) -> BatchHarvestSummary {
        self.batch_harvest_with_progress_cancellable(sources, &SilentReporter, cancel_token)
            .await
    }

    /// Harvests several sources with progress reporting and cancellation support.
    ///
    /// After a cancelled job the remaining sources are not started.
    pub async fn batch_harvest_with_progress_cancellable<P: ProgressReporter>(
        &self,
        sources: &[&SourceEntry],
        reporter: &P,
        cancel_token: CancellationToken,
    ) -> BatchHarvestSummary {
        let mut summary = BatchHarvestSummary::new();
        let total = sources.len();

        reporter.report(HarvestEvent::BatchStarted {
            total_sources: total,
        });

        for (i, source) in sources.iter().enumerate() {
            // Check cancellation before starting each source
            if cancel_token.is_cancelled() {
                reporter.report(HarvestEvent::BatchCancelled {
                    completed_sources: i,
                    total_sources: total,
                });
                return summary;
            }

            reporter.report(HarvestEvent::JobStarted {
                source_index: i,
                total_sources: total,
                source_name: &source.name,
                source_url: &source.url,
            });

            let job = HarvestJob::from_source(source, &self.config);
            let result = self
                .run_cancellable(&job, reporter, cancel_token.clone())
                .await;

            let cancelled = result.cancelled;
            summary.add(match result.state {
                JobState::Failed => SourceHarvestResult::failure(
                    source.name.clone(),
                    source.url.clone(),
                    result
                        .error
                        .unwrap_or_else(|| "harvest failed".to_string()),
                    Some(result.summary),
                ),
                _ => SourceHarvestResult::success(
                    source.name.clone(),
                    source.url.clone(),
                    result.count,
                    result.summary,
                ),
            });

            if cancelled {
                reporter.report(HarvestEvent::BatchCancelled {
                    completed_sources: i + 1,
                    total_sources: total,
                });
                return summary;
            }
        }

        reporter.report(HarvestEvent::BatchCompleted { summary: &summary });
        summary
    }
}

fn enter<P: ProgressReporter>(job: &HarvestJob, state: JobState, reporter: &P) {
    debug!(source = %job.name, state = state.as_str(), "Entering state");
    reporter.report(HarvestEvent::StateChanged {
        source_name: &job.name,
        state,
    });
}

fn fail<P: ProgressReporter>(
    job: &HarvestJob,
    summary: &Summary,
    error: AppError,
    reporter: &P,
) -> HarvestResult {
    let message = error.to_string();
    summary.app_error(format!("{}: {}", job.name, message));
    reporter.report(HarvestEvent::StateChanged {
        source_name: &job.name,
        state: JobState::Failed,
    });
    reporter.report(HarvestEvent::JobFailed {
        source_name: &job.name,
        error: &message,
    });

    let report = summary.snapshot();
    HarvestResult {
        state: JobState::Failed,
        count: report.num_docs,
        summary: report,
        cancelled: false,
        error: Some(message),
    }
}
