//! GeoHarvest Client - protocol clients for geodata sources
//!
//! This crate provides the transports and mappers for:
//!
//! - [`ckan`] - CKAN open data portals
//! - [`csw`] - OGC Catalogue Service 2.0.2
//! - [`wfs`] - OGC Web Feature Service 2.0.0
//!
//! # Overview
//!
//! Every client implements [`geoharvest_core::SourceClient`]. The
//! [`SourceClientFactoryEnum`] picks the client for a job's protocol, and
//! [`http::HttpFetcher`] handles timeouts, retries and authentication for all
//! of them.

pub mod ckan;
pub mod csw;
pub mod http;
pub mod mapping;
pub mod ows;
pub mod source;
pub mod wfs;

// Re-export main client types
pub use ckan::CkanClient;
pub use csw::CswClient;
pub use http::HttpFetcher;
pub use source::{SourceClientEnum, SourceClientFactoryEnum, SourceRecord};
pub use wfs::{WfsClient, WfsFeature};
