//! Test utilities and mock implementations for integration tests.
//!
//! Provides mock implementations of the core traits for testing
//! `HarvestService` and the deduplication pass in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use geoharvest_core::paging::PagingCursor;
use geoharvest_core::{
    AppError, BulkSink, CanonicalDocument, Catalog, HarvestEvent, HarvestJob, JobState,
    MappedEntity, Mapper, MappingContext, ProgressReporter, ProtocolType, RawPage,
    ResourceDescriptor, SourceClient, SourceClientFactory, StaticCatalogRegistry,
};
use tokio_util::sync::CancellationToken;

pub const TEST_SOURCE_URL: &str = "https://geo.example.org/csw";
pub const TEST_CATALOG: &str = "test-catalog";

// =============================================================================
// MockSourceClient
// =============================================================================

/// One crawlable resource of a mock source.
#[derive(Debug, Clone)]
pub struct MockResource {
    pub name: String,
    /// Number of records the resource holds.
    pub total: usize,
    /// Whether pages report the match count.
    pub report_count: bool,
    pub supports_paging: bool,
    /// Start position whose page fails.
    pub fail_at: Option<usize>,
}

impl MockResource {
    pub fn new(name: &str, total: usize) -> Self {
        Self {
            name: name.to_string(),
            total,
            report_count: true,
            supports_paging: true,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, start: usize) -> Self {
        self.fail_at = Some(start);
        self
    }
}

/// A raw record of the mock protocol.
#[derive(Debug, Clone)]
pub struct MockRecord {
    pub id: String,
    pub title: String,
}

/// Mock client serving generated records page by page.
#[derive(Clone)]
pub struct MockSourceClient {
    resources: Vec<MockResource>,
    discover_error: bool,
    /// `(resource, start_position)` of every page request, in order.
    pub page_requests: Arc<Mutex<Vec<(String, usize)>>>,
    /// Number of mappers built.
    pub mapper_calls: Arc<AtomicUsize>,
    /// Cancelled once this many pages have been served.
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockSourceClient {
    pub fn new(resources: Vec<MockResource>) -> Self {
        Self {
            resources,
            discover_error: false,
            page_requests: Arc::new(Mutex::new(Vec::new())),
            mapper_calls: Arc::new(AtomicUsize::new(0)),
            cancel_after: None,
        }
    }

    pub fn with_discover_error(mut self) -> Self {
        self.discover_error = true;
        self
    }

    pub fn cancel_after_pages(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((pages, token));
        self
    }

    pub fn requests(&self) -> Vec<(String, usize)> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn mappers_built(&self) -> usize {
        self.mapper_calls.load(Ordering::SeqCst)
    }
}

impl SourceClient for MockSourceClient {
    type Record = MockRecord;

    async fn discover(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        if self.discover_error {
            return Err(AppError::CapabilitiesError(
                "root element is ExceptionReport".to_string(),
            ));
        }
        Ok(self
            .resources
            .iter()
            .map(|r| ResourceDescriptor {
                name: r.name.clone(),
                crs: None,
                supports_paging: r.supports_paging,
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> Result<RawPage<MockRecord>, AppError> {
        let served = {
            let mut requests = self.page_requests.lock().unwrap();
            requests.push((resource.name.clone(), cursor.start_position));
            requests.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if served >= *after {
                token.cancel();
            }
        }

        let mock = self
            .resources
            .iter()
            .find(|r| r.name == resource.name)
            .ok_or_else(|| AppError::Generic(format!("unknown resource {}", resource.name)))?;
        if mock.fail_at == Some(cursor.start_position) {
            return Err(AppError::XmlError("unexpected end of document".to_string()));
        }

        let end = (cursor.start_position + cursor.page_size).min(mock.total);
        let records = (cursor.start_position..end)
            .map(|i| MockRecord {
                id: format!("{}-{}", mock.name, i),
                title: format!("{} record {}", mock.name, i),
            })
            .collect();

        Ok(RawPage {
            records,
            number_matched: mock.report_count.then_some(mock.total),
        })
    }

    fn record_identifier(&self, record: &MockRecord) -> Option<String> {
        (!record.id.is_empty()).then(|| record.id.clone())
    }

    fn create_mapper<'a>(
        &'a self,
        record: MockRecord,
        _resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a> {
        self.mapper_calls.fetch_add(1, Ordering::SeqCst);
        Box::new(MockMapper { record, context })
    }
}

struct MockMapper<'a> {
    record: MockRecord,
    context: &'a MappingContext,
}

impl Mapper for MockMapper<'_> {
    fn identifier(&self) -> &str {
        &self.record.id
    }

    fn create_document(&self) -> Result<CanonicalDocument, AppError> {
        if self.record.title.is_empty() {
            return Err(AppError::MappingError("record has no title".to_string()));
        }
        Ok(CanonicalDocument {
            title: self.record.title.clone(),
            publisher: self.context.catalog.publisher.clone(),
            ..Default::default()
        })
    }

    fn original_text(&self) -> String {
        format!("<record id=\"{}\">{}</record>", self.record.id, self.record.title)
    }
}

// =============================================================================
// MockSourceClientFactory
// =============================================================================

/// Factory handing out clones of one mock client.
#[derive(Clone)]
pub struct MockSourceClientFactory {
    client: MockSourceClient,
}

impl MockSourceClientFactory {
    pub fn new(client: MockSourceClient) -> Self {
        Self { client }
    }
}

impl SourceClientFactory for MockSourceClientFactory {
    type Client = MockSourceClient;

    fn create(&self, job: &HarvestJob) -> Result<Self::Client, AppError> {
        if !job.source_url.starts_with("http") {
            return Err(AppError::InvalidSourceUrl(job.source_url.clone()));
        }
        Ok(self.client.clone())
    }
}

// =============================================================================
// Sinks, registries and reporters
// =============================================================================

/// Sink that keeps every submitted entity.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub entities: Arc<Mutex<Vec<MappedEntity>>>,
    pub flushes: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<MappedEntity> {
        std::mem::take(&mut *self.entities.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.entities.lock().unwrap().len()
    }
}

impl BulkSink for RecordingSink {
    async fn add(&self, entity: MappedEntity) -> Result<(), AppError> {
        self.entities.lock().unwrap().push(entity);
        Ok(())
    }

    async fn flush(&self) -> Result<usize, AppError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(self.len())
    }
}

/// Registry containing only [`TEST_CATALOG`].
pub fn test_registry() -> StaticCatalogRegistry {
    StaticCatalogRegistry::new().with_catalog(Catalog {
        id: TEST_CATALOG.to_string(),
        title: "Test Catalog".to_string(),
        publisher: Some("Survey Agency".to_string()),
    })
}

/// A job against [`TEST_SOURCE_URL`] registered under [`TEST_CATALOG`].
pub fn test_job(page_size: usize) -> HarvestJob {
    HarvestJob::new("test-source", ProtocolType::Csw, TEST_SOURCE_URL)
        .with_catalog(TEST_CATALOG)
        .with_page_size(page_size)
}

/// Reporter recording progress pairs and state transitions.
#[derive(Default)]
pub struct RecordingReporter {
    pub progress: Mutex<Vec<(usize, usize)>>,
    pub states: Mutex<Vec<JobState>>,
    pub failed_resources: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Progress { done, total } => {
                self.progress.lock().unwrap().push((done, total));
            }
            HarvestEvent::StateChanged { state, .. } => {
                self.states.lock().unwrap().push(state);
            }
            HarvestEvent::ResourceFailed { resource, .. } => {
                self.failed_resources.lock().unwrap().push(resource.to_string());
            }
            _ => {}
        }
    }
}
