//! Protocol client factory and enum dispatch.
//!
//! This module provides a unified interface for working with different
//! protocol clients through the [`SourceClientEnum`] enum.
//!
//! # Why an Enum Instead of `dyn Trait`?
//!
//! The [`SourceClient`] trait uses `impl Future` return types (RPITIT)
//! and an associated `Record` type, making it not object-safe.
//! We use an enum for static dispatch.

use std::sync::Arc;

use geoharvest_core::error::AppError;
use geoharvest_core::paging::PagingCursor;
use geoharvest_core::xml::XmlElement;
use geoharvest_core::{
    CanonicalDocument, Codelists, HarvestJob, HttpConfig, Mapper, MappingContext, ProtocolType,
    RawPage, ResourceDescriptor, SourceClient, SourceClientFactory,
};

use crate::ckan::{CkanClient, CkanDataset};
use crate::csw::CswClient;
use crate::http::HttpFetcher;
use crate::wfs::{WfsClient, WfsFeature};

/// A raw record from any supported protocol.
#[derive(Debug, Clone)]
pub enum SourceRecord {
    Ckan(CkanDataset),
    Csw(XmlElement),
    Wfs(WfsFeature),
}

/// Unified protocol client that wraps the concrete implementations.
#[derive(Clone)]
pub enum SourceClientEnum {
    Ckan(CkanClient),
    Csw(CswClient),
    Wfs(WfsClient),
}

impl SourceClientEnum {
    pub fn protocol(&self) -> ProtocolType {
        match self {
            Self::Ckan(_) => ProtocolType::Ckan,
            Self::Csw(_) => ProtocolType::Csw,
            Self::Wfs(_) => ProtocolType::Wfs,
        }
    }
}

fn wrap<R>(page: RawPage<R>, f: impl Fn(R) -> SourceRecord) -> RawPage<SourceRecord> {
    RawPage {
        records: page.records.into_iter().map(f).collect(),
        number_matched: page.number_matched,
    }
}

impl SourceClient for SourceClientEnum {
    type Record = SourceRecord;

    async fn discover(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        match self {
            Self::Ckan(c) => c.discover().await,
            Self::Csw(c) => c.discover().await,
            Self::Wfs(c) => c.discover().await,
        }
    }

    async fn fetch_page(
        &self,
        resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> Result<RawPage<SourceRecord>, AppError> {
        match self {
            Self::Ckan(c) => Ok(wrap(c.fetch_page(resource, cursor).await?, SourceRecord::Ckan)),
            Self::Csw(c) => Ok(wrap(c.fetch_page(resource, cursor).await?, SourceRecord::Csw)),
            Self::Wfs(c) => Ok(wrap(c.fetch_page(resource, cursor).await?, SourceRecord::Wfs)),
        }
    }

    fn record_identifier(&self, record: &SourceRecord) -> Option<String> {
        match (self, record) {
            (Self::Ckan(c), SourceRecord::Ckan(r)) => c.record_identifier(r),
            (Self::Csw(c), SourceRecord::Csw(r)) => c.record_identifier(r),
            (Self::Wfs(c), SourceRecord::Wfs(r)) => c.record_identifier(r),
            _ => None,
        }
    }

    fn create_mapper<'a>(
        &'a self,
        record: SourceRecord,
        resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a> {
        match (self, record) {
            (Self::Ckan(c), SourceRecord::Ckan(r)) => c.create_mapper(r, resource, context),
            (Self::Csw(c), SourceRecord::Csw(r)) => c.create_mapper(r, resource, context),
            (Self::Wfs(c), SourceRecord::Wfs(r)) => c.create_mapper(r, resource, context),
            (client, _) => Box::new(ForeignRecord {
                protocol: client.protocol(),
            }),
        }
    }
}

/// Mapper for a record handed to a client of another protocol. Never
/// produced by the crawl itself, whose records always come from the same client.
struct ForeignRecord {
    protocol: ProtocolType,
}

impl Mapper for ForeignRecord {
    fn identifier(&self) -> &str {
        ""
    }

    fn create_document(&self) -> Result<CanonicalDocument, AppError> {
        Err(AppError::MappingError(format!(
            "record does not belong to a {} source",
            self.protocol
        )))
    }

    fn original_text(&self) -> String {
        String::new()
    }
}

/// Factory building the client for a job's protocol.
///
/// Holds the process-wide HTTP defaults and code lists; credentials, proxy
/// and filters come from the job.
#[derive(Clone)]
pub struct SourceClientFactoryEnum {
    http: HttpConfig,
    codelists: Arc<Codelists>,
}

impl SourceClientFactoryEnum {
    pub fn new(http: HttpConfig, codelists: Arc<Codelists>) -> Self {
        Self { http, codelists }
    }
}

impl Default for SourceClientFactoryEnum {
    fn default() -> Self {
        Self::new(HttpConfig::default(), Arc::new(Codelists::new()))
    }
}

impl SourceClientFactory for SourceClientFactoryEnum {
    type Client = SourceClientEnum;

    fn create(&self, job: &HarvestJob) -> Result<Self::Client, AppError> {
        let http = HttpFetcher::new(&self.http, job.credentials.clone(), job.proxy.as_deref())?;
        let url = job.source_url.as_str();

        Ok(match job.protocol {
            ProtocolType::Ckan => SourceClientEnum::Ckan(
                CkanClient::new(url, http, Arc::clone(&self.codelists))?
                    .with_filter(job.filter.clone()),
            ),
            ProtocolType::Csw => SourceClientEnum::Csw(
                CswClient::new(url, http, Arc::clone(&self.codelists))?
                    .with_constraint(job.filter.clone()),
            ),
            ProtocolType::Wfs => SourceClientEnum::Wfs(WfsClient::new(url, http)?),
        })
    }
}
