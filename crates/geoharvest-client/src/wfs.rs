//! OGC Web Feature Service (WFS 2.0.0) client.
//!
//! Every advertised feature type is a separate resource. Features are read
//! from `wfs:member` (2.0) or `gml:featureMember`/`gml:featureMembers` (1.1
//! servers answering in compatibility mode).

use std::collections::BTreeMap;

use geoharvest_core::error::AppError;
use geoharvest_core::geometry::gml::{self, ParseOptions};
use geoharvest_core::geometry::{Geometry, GeometryInformation, TARGET_CRS};
use geoharvest_core::paging::PagingCursor;
use geoharvest_core::xml::XmlElement;
use geoharvest_core::{
    CanonicalDocument, Mapper, MappingContext, RawPage, ResourceDescriptor, SourceClient,
};
use reqwest::Url;

use crate::http::{HttpFetcher, parse_source_url};
use crate::ows;

/// Property names tried, in order, for a feature's title.
const TITLE_PROPERTIES: [&str; 4] = ["title", "name", "label", "bezeichnung"];

/// A feature together with the type it was requested as.
#[derive(Debug, Clone, PartialEq)]
pub struct WfsFeature {
    pub type_name: String,
    pub element: XmlElement,
}

/// HTTP client for a WFS 2.0.0 endpoint.
#[derive(Clone)]
pub struct WfsClient {
    http: HttpFetcher,
    endpoint: Url,
}

impl WfsClient {
    /// # Errors
    ///
    /// Returns `AppError::InvalidSourceUrl` if the endpoint is not an HTTP(S) URL.
    pub fn new(endpoint: &str, http: HttpFetcher) -> Result<Self, AppError> {
        Ok(Self {
            http,
            endpoint: parse_source_url(endpoint)?,
        })
    }

    fn capabilities_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("service", "WFS")
            .append_pair("request", "GetCapabilities")
            .append_pair("acceptVersions", "2.0.0");
        url
    }

    fn feature_url(&self, resource: &ResourceDescriptor, cursor: &PagingCursor) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("service", "WFS")
                .append_pair("version", "2.0.0")
                .append_pair("request", "GetFeature")
                .append_pair("typeNames", &resource.name);
            if resource.supports_paging {
                pairs
                    .append_pair("startIndex", &cursor.start_position.to_string())
                    .append_pair("count", &cursor.page_size.to_string());
            }
        }
        url
    }
}

/// Reads the feature types and the paging constraint from a capabilities document.
pub fn parse_capabilities(root: &XmlElement) -> Result<Vec<ResourceDescriptor>, AppError> {
    ows::expect_capabilities(root, "WFS_Capabilities")?;

    let supports_paging = root
        .child("OperationsMetadata")
        .into_iter()
        .flat_map(|ops| ops.children_named("Constraint"))
        .find(|c| c.attr("name") == Some("ImplementsResultPaging"))
        .and_then(|c| c.child_text("DefaultValue"))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let feature_types = root
        .child("FeatureTypeList")
        .ok_or_else(|| AppError::CapabilitiesError("no <FeatureTypeList>".to_string()))?;

    Ok(feature_types
        .children_named("FeatureType")
        .filter_map(|ft| {
            Some(ResourceDescriptor {
                name: ft.child_text("Name")?,
                crs: ft
                    .child_text("DefaultCRS")
                    .or_else(|| ft.child_text("DefaultSRS")),
                supports_paging,
            })
        })
        .collect())
}

/// Splits a `FeatureCollection` into its features.
pub fn parse_feature_collection(
    root: XmlElement,
    type_name: &str,
) -> Result<RawPage<WfsFeature>, AppError> {
    ows::expect_response(&root, "FeatureCollection")?;

    let number_matched = match root.attr("numberMatched").map(str::trim) {
        None | Some("unknown") => None,
        Some(value) => value.parse().ok(),
    };

    let records = root
        .children
        .into_iter()
        .flat_map(|member| match member.name.as_str() {
            "member" | "featureMember" | "featureMembers" => member.children,
            _ => Vec::new(),
        })
        .map(|element| WfsFeature {
            type_name: type_name.to_string(),
            element,
        })
        .collect();

    Ok(RawPage {
        records,
        number_matched,
    })
}

impl SourceClient for WfsClient {
    type Record = WfsFeature;

    async fn discover(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        let url = self.capabilities_url();
        let root = self
            .http
            .get_xml(&url)
            .await
            .map_err(|e| AppError::CapabilitiesError(format!("{url}: {e}")))?;
        let resources = parse_capabilities(&root)?;
        tracing::debug!(
            endpoint = %self.endpoint,
            feature_types = resources.len(),
            paging = resources.first().is_some_and(|r| r.supports_paging),
            "WFS capabilities read"
        );
        Ok(resources)
    }

    async fn fetch_page(
        &self,
        resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> Result<RawPage<WfsFeature>, AppError> {
        let url = self.feature_url(resource, cursor);
        let root = self.http.get_xml(&url).await?;
        parse_feature_collection(root, &resource.name)
    }

    fn record_identifier(&self, record: &WfsFeature) -> Option<String> {
        record
            .element
            .attr("id")
            .or_else(|| record.element.attr("fid"))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn create_mapper<'a>(
        &'a self,
        record: WfsFeature,
        resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a> {
        Box::new(WfsMapper::new(record, resource, context))
    }
}

// =============================================================================
// Mapper
// =============================================================================

/// Maps a GML feature into a canonical document.
pub struct WfsMapper<'a> {
    feature: WfsFeature,
    identifier: String,
    resource: &'a ResourceDescriptor,
    context: &'a MappingContext,
}

impl<'a> WfsMapper<'a> {
    pub fn new(
        feature: WfsFeature,
        resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Self {
        let identifier = feature
            .element
            .attr("id")
            .or_else(|| feature.element.attr("fid"))
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            feature,
            identifier,
            resource,
            context,
        }
    }

    /// CRS for geometries without `srsName`: the feature type's default CRS,
    /// then the job's, then WGS84.
    fn default_crs(&self) -> &str {
        self.resource
            .crs
            .as_deref()
            .or(self.context.default_crs.as_deref())
            .unwrap_or(TARGET_CRS)
    }

    /// Parses the first property holding a GML geometry. `boundedBy` is only
    /// used when no other property has one.
    fn spatial(&self) -> Result<Option<GeometryInformation>, AppError> {
        let options = ParseOptions::with_crs(self.default_crs());
        let properties = &self.feature.element.children;

        for property in properties.iter().filter(|p| p.name != "boundedBy") {
            if let Some(geometry) = gml::parse_property(property, &options)? {
                return Ok(Some(self.information(geometry, property)?));
            }
        }

        if let Some(bounded_by) = properties.iter().find(|p| p.name == "boundedBy") {
            if let Some(geometry) = gml::parse_property(bounded_by, &options)? {
                return Ok(Some(self.information(geometry, bounded_by)?));
            }
        }

        Ok(None)
    }

    fn information(
        &self,
        geometry: Geometry,
        property: &XmlElement,
    ) -> Result<GeometryInformation, AppError> {
        let crs_used = property
            .children
            .iter()
            .find_map(|c| c.attr("srsName"))
            .or_else(|| property.attr("srsName"))
            .unwrap_or_else(|| self.default_crs());
        Ok(GeometryInformation::from_geometry(geometry, crs_used)?)
    }

    /// Leaf properties with text, keyed by local name.
    fn simple_properties(&self) -> BTreeMap<String, String> {
        self.feature
            .element
            .children
            .iter()
            .filter(|p| p.children.is_empty())
            .filter_map(|p| {
                let text = p.text.trim();
                (!text.is_empty()).then(|| (p.name.clone(), text.to_string()))
            })
            .collect()
    }
}

impl Mapper for WfsMapper<'_> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn create_document(&self) -> Result<CanonicalDocument, AppError> {
        let mut extras = self.simple_properties();
        let title = TITLE_PROPERTIES
            .iter()
            .find_map(|name| extras.get(*name).cloned())
            .unwrap_or_else(|| format!("{} {}", self.feature.type_name, self.identifier));
        let description = extras.remove("description");
        extras.insert("feature_type".to_string(), self.feature.type_name.clone());

        Ok(CanonicalDocument {
            title,
            description,
            publisher: self.context.catalog.publisher.clone(),
            spatial: self.spatial()?,
            extras,
            ..Default::default()
        })
    }

    fn original_text(&self) -> String {
        self.feature.element.original_xml()
    }
}
