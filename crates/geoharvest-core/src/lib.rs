//! GeoHarvest Core - harvest engine, geometry, and reconciliation.
//!
//! This crate provides the protocol-independent part of the harvester:
//!
//! - **Geometry**: GML parsing with CRS transformation to WGS84 ([`geometry`])
//! - **Crawl control**: bounded-parallel resources, sequential pages ([`paging`])
//! - **Extraction**: identifier filtering and mapping ([`RecordExtractor`])
//! - **Coordination**: the job state machine ([`HarvestService`])
//! - **Deduplication**: merging duplicates into one index entry ([`Deduplicator`])
//! - **Traits**: [`SourceClient`], [`BulkSink`], [`CatalogRegistry`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! Protocol transports live in `geoharvest-client`; this crate only talks to
//! them through [`SourceClientFactory`]. The index is reached through
//! [`IndexBackend`], so the engine runs the same against an in-memory
//! index, a file, or a search engine.
//!
//! # Example
//!
//! ```ignore
//! use geoharvest_core::{BufferedSink, HarvestJob, HarvestService, MemoryIndex, ProtocolType};
//! use geoharvest_core::progress::TracingReporter;
//!
//! let index = MemoryIndex::new();
//! let service = HarvestService::new(client_factory, BufferedSink::new(index.clone()), registry);
//! let job = HarvestJob::new("roads", ProtocolType::Wfs, "https://geo.example.org/wfs");
//! let result = service.run_with_progress(&job, &TracingReporter).await;
//! assert!(!result.requires_rollback());
//! ```

pub mod codelist;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod filter;
pub mod geometry;
pub mod harvest;
pub mod i18n;
pub mod job;
pub mod model;
pub mod paging;
pub mod progress;
pub mod registry;
pub mod sink;
pub mod summary;
pub mod traits;
pub mod xml;

// Code lists
pub use codelist::{Codelists, Periodicity};

// Configuration
pub use config::{
    CatalogEntry, HarvestConfig, HttpConfig, ProtocolType, SourceEntry, SourcesConfig,
    default_config_path, load_sources_config,
};

// Error handling
pub use error::AppError;

// Internationalization
pub use i18n::LocalizedField;

// Geometry
pub use geometry::{Coord, Crs, Geometry, GeometryError, GeometryInformation, GmlContext, ParseOptions};

// Domain models
pub use model::{
    CanonicalDocument, Catalog, Distribution, DocumentField, HarvestMetadata, IndexOperation,
    MappedEntity,
};

// Jobs and results
pub use job::{Credentials, HarvestJob, HarvestResult, IdentifierRules, JobState};
pub use summary::{
    BatchHarvestSummary, SourceHarvestResult, Summary, SummaryReport, Warning, WarningCategory,
};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, ProgressTracker, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{
    BulkSink, CatalogRegistry, IndexBackend, Mapper, MappingContext, RawPage, ResourceDescriptor,
    SourceClient, SourceClientFactory,
};

// Engine components
pub use dedup::{Bucket, Deduplicator, MergePolicy, MergeRule, build_buckets};
pub use extract::RecordExtractor;
pub use filter::IdentifierFilter;
pub use harvest::HarvestService;
pub use paging::{PageStats, PagingCursor, ResourceOutcome, for_each_page, for_each_resource};
pub use registry::StaticCatalogRegistry;
pub use sink::{BufferedSink, MemoryIndex};
