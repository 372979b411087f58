//! Shared fixtures for the protocol client tests.

use std::sync::Arc;
use std::time::Duration;

use geoharvest_client::SourceClientFactoryEnum;
use geoharvest_core::harvest::HarvestService;
use geoharvest_core::{
    BufferedSink, Catalog, Codelists, HarvestJob, HttpConfig, MemoryIndex, ProtocolType,
    StaticCatalogRegistry,
};

pub const CATALOG: &str = "geo";

pub type TestService =
    HarvestService<SourceClientFactoryEnum, BufferedSink<MemoryIndex>, StaticCatalogRegistry>;

/// A service writing into `index`, with retries fast enough for tests.
pub fn service(index: &MemoryIndex) -> TestService {
    let http = HttpConfig {
        timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let registry = StaticCatalogRegistry::new().with_catalog(Catalog {
        id: CATALOG.to_string(),
        title: "Geodata".to_string(),
        publisher: Some("Survey Agency".to_string()),
    });
    HarvestService::new(
        SourceClientFactoryEnum::new(http, Arc::new(Codelists::new())),
        BufferedSink::new(index.clone()),
        registry,
    )
}

pub fn job(protocol: ProtocolType, url: String, page_size: usize) -> HarvestJob {
    HarvestJob::new("test-source", protocol, url)
        .with_catalog(CATALOG)
        .with_page_size(page_size)
}
