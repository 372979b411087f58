//! Trait definitions for external dependencies.
//!
//! The engine talks to protocol transports, mappers, the bulk sink and the
//! catalog registry only through these traits, so:
//!
//! - **Testability**: mock sources and sinks drive the coordinator in tests
//! - **Flexibility**: CKAN, CSW and WFS clients plug into the same crawl loop
//! - **Decoupling**: the core never depends on HTTP or a search engine client
//!
//! # Example
//!
//! ```ignore
//! use geoharvest_core::{HarvestJob, HarvestService, ProtocolType};
//!
//! let service = HarvestService::new(client_factory, sink, registry);
//! let job = HarvestJob::new("roads", ProtocolType::Wfs, "https://geo.example.org/wfs");
//! let result = service.run(&job).await;
//! println!("{} documents, state {}", result.count, result.state);
//! ```

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::HarvestJob;
use crate::model::{CanonicalDocument, Catalog, IndexOperation, MappedEntity};
use crate::paging::PagingCursor;

/// Translates one source record into a canonical document.
///
/// A mapper is built per record by [`SourceClient::create_mapper`] and only
/// for records that passed identifier filtering.
pub trait Mapper {
    /// Stable identifier of the record.
    fn identifier(&self) -> &str;

    /// Builds the canonical document.
    ///
    /// Failures are record-level: the record is skipped with a warning.
    fn create_document(&self) -> Result<CanonicalDocument, AppError>;

    /// The source-native text of the record.
    fn original_text(&self) -> String;

    /// Returns true if the record should be skipped without a warning
    /// (for example a placeholder or service-only record).
    fn should_be_skipped(&self) -> bool {
        false
    }
}

/// Job-level values a mapper may need.
#[derive(Debug, Clone)]
pub struct MappingContext {
    pub source_name: String,
    pub source_kind: String,
    pub catalog: Catalog,
    pub language: String,
    /// CRS for geometries that carry no `srsName`.
    pub default_crs: Option<String>,
    pub harvested_at: DateTime<Utc>,
}

/// One independently crawlable collection exposed by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Resource name (feature type name, record type, ...).
    pub name: String,
    /// Default CRS advertised for the resource.
    pub crs: Option<String>,
    /// Whether the resource can be requested page by page.
    pub supports_paging: bool,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crs: None,
            supports_paging: true,
        }
    }
}

/// One page of raw records.
#[derive(Debug, Clone)]
pub struct RawPage<R> {
    pub records: Vec<R>,
    /// Total number of records the source reports for the resource, if any.
    pub number_matched: Option<usize>,
}

/// Protocol transport for one source.
pub trait SourceClient: Send + Sync {
    /// Source-native representation of one record.
    type Record: Send;

    /// Fetches and validates the capability document and lists resources.
    ///
    /// Any error here is systemic and fails the job.
    fn discover(&self) -> impl Future<Output = Result<Vec<ResourceDescriptor>, AppError>> + Send;

    /// Fetches the page described by `cursor`.
    fn fetch_page(
        &self,
        resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> impl Future<Output = Result<RawPage<Self::Record>, AppError>> + Send;

    /// Extracts the stable identifier of a record without mapping it.
    fn record_identifier(&self, record: &Self::Record) -> Option<String>;

    /// Builds the mapper for an admitted record.
    fn create_mapper<'a>(
        &'a self,
        record: Self::Record,
        resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a>;
}

/// Factory for creating source clients.
///
/// Separate from SourceClient to avoid issues with async trait constructors.
pub trait SourceClientFactory: Send + Sync {
    /// The type of client this factory creates.
    type Client: SourceClient;

    /// Creates a client for the job's source URL, protocol and credentials.
    fn create(&self, job: &HarvestJob) -> Result<Self::Client, AppError>;
}

/// Destination for mapped entities.
///
/// Must tolerate concurrent callers from parallel resource workers.
pub trait BulkSink: Send + Sync {
    /// Submits one entity. May buffer.
    fn add(&self, entity: MappedEntity) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Writes everything buffered and returns the number of documents written.
    fn flush(&self) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Physical index that applies index/delete operations.
pub trait IndexBackend: Send + Sync {
    /// Applies operations in order and returns how many were applied.
    fn apply(
        &self,
        operations: Vec<IndexOperation>,
    ) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Read-only catalog lookup.
pub trait CatalogRegistry: Send + Sync {
    fn get_catalog(
        &self,
        catalog_id: &str,
    ) -> impl Future<Output = Result<Option<Catalog>, AppError>> + Send;
}
