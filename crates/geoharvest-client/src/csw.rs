//! OGC Catalogue Service (CSW 2.0.2) client.
//!
//! Records are requested as full Dublin Core `csw:Record`s with KVP
//! `GetRecords`. CSW counts `startPosition` from 1.

use std::sync::Arc;

use geoharvest_core::error::AppError;
use geoharvest_core::geometry::{GeometryInformation, TARGET_CRS};
use geoharvest_core::paging::PagingCursor;
use geoharvest_core::xml::XmlElement;
use geoharvest_core::{
    CanonicalDocument, Codelists, Distribution, Mapper, MappingContext, Periodicity, RawPage,
    ResourceDescriptor, SourceClient,
};
use reqwest::Url;

use crate::http::{HttpFetcher, parse_source_url};
use crate::mapping::{parse_timestamp, resolve_license};
use crate::ows;

/// Type name of the one resource a CSW endpoint exposes.
pub const CSW_RECORD: &str = "csw:Record";

const OUTPUT_SCHEMA: &str = "http://www.opengis.net/cat/csw/2.0.2";

/// Element names a `SearchResults` block may hold, depending on element set.
const RECORD_ELEMENTS: [&str; 3] = ["Record", "SummaryRecord", "BriefRecord"];

/// HTTP client for a CSW 2.0.2 endpoint.
#[derive(Clone)]
pub struct CswClient {
    http: HttpFetcher,
    endpoint: Url,
    codelists: Arc<Codelists>,
    /// OGC CQL constraint passed with `GetRecords`.
    constraint: Option<String>,
}

impl CswClient {
    /// # Errors
    ///
    /// Returns `AppError::InvalidSourceUrl` if the endpoint is not an HTTP(S) URL.
    pub fn new(
        endpoint: &str,
        http: HttpFetcher,
        codelists: Arc<Codelists>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            http,
            endpoint: parse_source_url(endpoint)?,
            codelists,
            constraint: None,
        })
    }

    pub fn with_constraint(mut self, constraint: Option<String>) -> Self {
        self.constraint = constraint.filter(|c| !c.trim().is_empty());
        self
    }

    fn capabilities_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("service", "CSW")
            .append_pair("request", "GetCapabilities")
            .append_pair("acceptVersions", "2.0.2");
        url
    }

    fn records_url(&self, cursor: &PagingCursor) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("service", "CSW")
                .append_pair("version", "2.0.2")
                .append_pair("request", "GetRecords")
                .append_pair("typeNames", CSW_RECORD)
                .append_pair("resultType", "results")
                .append_pair("elementSetName", "full")
                .append_pair("outputSchema", OUTPUT_SCHEMA)
                .append_pair("startPosition", &(cursor.start_position + 1).to_string())
                .append_pair("maxRecords", &cursor.page_size.to_string());
            if let Some(constraint) = &self.constraint {
                pairs
                    .append_pair("constraintLanguage", "CQL_TEXT")
                    .append_pair("constraint_language_version", "1.1.0")
                    .append_pair("constraint", constraint);
            }
        }
        url
    }
}

impl SourceClient for CswClient {
    type Record = XmlElement;

    async fn discover(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        let url = self.capabilities_url();
        let root = self
            .http
            .get_xml(&url)
            .await
            .map_err(|e| AppError::CapabilitiesError(format!("{url}: {e}")))?;
        ows::expect_capabilities(&root, "Capabilities")?;

        if let Some(operations) = root.child("OperationsMetadata") {
            let has_get_records = operations
                .children_named("Operation")
                .any(|op| op.attr("name") == Some("GetRecords"));
            if !has_get_records {
                return Err(AppError::CapabilitiesError(
                    "GetRecords is not offered".to_string(),
                ));
            }
        }

        Ok(vec![ResourceDescriptor::new(CSW_RECORD)])
    }

    async fn fetch_page(
        &self,
        _resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> Result<RawPage<XmlElement>, AppError> {
        let url = self.records_url(cursor);
        let mut root = self.http.get_xml(&url).await?;
        ows::expect_response(&root, "GetRecordsResponse")?;

        let position = root
            .children
            .iter()
            .position(|c| c.name == "SearchResults")
            .ok_or_else(|| AppError::XmlError("response has no <SearchResults>".to_string()))?;
        let results = root.children.swap_remove(position);

        let number_matched = results
            .attr("numberOfRecordsMatched")
            .and_then(|v| v.trim().parse().ok());
        let records = results
            .children
            .into_iter()
            .filter(|c| RECORD_ELEMENTS.contains(&c.name.as_str()))
            .collect();

        Ok(RawPage {
            records,
            number_matched,
        })
    }

    fn record_identifier(&self, record: &XmlElement) -> Option<String> {
        record.child_text("identifier")
    }

    fn create_mapper<'a>(
        &'a self,
        record: XmlElement,
        _resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a> {
        Box::new(CswMapper::new(record, context, &self.codelists))
    }
}

// =============================================================================
// Mapper
// =============================================================================

/// Maps a Dublin Core `csw:Record` into a canonical document.
pub struct CswMapper<'a> {
    record: XmlElement,
    identifier: String,
    context: &'a MappingContext,
    codelists: &'a Codelists,
}

impl<'a> CswMapper<'a> {
    pub fn new(record: XmlElement, context: &'a MappingContext, codelists: &'a Codelists) -> Self {
        let identifier = record.child_text("identifier").unwrap_or_default();
        Self {
            record,
            identifier,
            context,
            codelists,
        }
    }

    fn text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.record.child_text(name))
    }

    fn distributions(&self) -> Vec<Distribution> {
        self.record
            .children
            .iter()
            .filter(|c| c.name == "references" || c.name == "URI")
            .filter_map(|c| {
                let url = c.text.trim();
                (!url.is_empty()).then(|| Distribution {
                    url: url.to_string(),
                    format: c.attr("scheme").or_else(|| c.attr("protocol")).map(str::to_string),
                    title: c.attr("name").map(str::to_string),
                })
            })
            .collect()
    }

    fn spatial(&self) -> Result<Option<GeometryInformation>, AppError> {
        let Some(bbox) = self
            .record
            .children
            .iter()
            .find(|c| c.name == "BoundingBox" || c.name == "WGS84BoundingBox")
        else {
            return Ok(None);
        };
        let geometry = ows::bounding_box(bbox)?;
        let crs_used = match bbox.attr("crs") {
            Some(crs) if bbox.name == "BoundingBox" => crs,
            _ => TARGET_CRS,
        };
        Ok(Some(GeometryInformation::from_geometry(geometry, crs_used)?))
    }
}

impl Mapper for CswMapper<'_> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn create_document(&self) -> Result<CanonicalDocument, AppError> {
        let title = self.text(&["title"]).ok_or_else(|| {
            AppError::MappingError(format!("record {} has no title", self.identifier))
        })?;

        let mut extras = std::collections::BTreeMap::new();
        if let Some(kind) = self.text(&["type"]) {
            extras.insert("type".to_string(), kind);
        }
        if let Some(format) = self.text(&["format"]) {
            extras.insert("format".to_string(), format);
        }

        Ok(CanonicalDocument {
            title,
            description: self.text(&["abstract", "description"]),
            keywords: self.record.children_text("subject"),
            license: self
                .text(&["license", "rights"])
                .and_then(|l| resolve_license(self.codelists, &l)),
            periodicity: self
                .text(&["accrualPeriodicity"])
                .map(|p| Periodicity::from_code(&p))
                .unwrap_or_default(),
            publisher: self
                .text(&["publisher", "creator"])
                .or_else(|| self.context.catalog.publisher.clone()),
            modified: self
                .text(&["modified", "date"])
                .and_then(|d| parse_timestamp(&d)),
            distributions: self.distributions(),
            spatial: self.spatial()?,
            extras,
            ..Default::default()
        })
    }

    fn original_text(&self) -> String {
        self.record.original_xml()
    }

    /// Service descriptions are not datasets.
    fn should_be_skipped(&self) -> bool {
        self.text(&["type"])
            .is_some_and(|t| t.eq_ignore_ascii_case("service"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geoharvest_core::geometry::{Coord, Geometry};
    use geoharvest_core::xml::parse_document;
    use geoharvest_core::{Catalog, HttpConfig};

    const RECORD: &str = r#"
        <csw:Record xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
                    xmlns:dc="http://purl.org/dc/elements/1.1/"
                    xmlns:dct="http://purl.org/dc/terms/"
                    xmlns:ows="http://www.opengis.net/ows">
          <dc:identifier>urn:uuid:5a6c</dc:identifier>
          <dc:title>Protected areas</dc:title>
          <dct:abstract>Nature reserves of the region.</dct:abstract>
          <dc:subject>environment</dc:subject>
          <dc:subject>protected sites</dc:subject>
          <dc:type>dataset</dc:type>
          <dc:rights>cc-by-4.0</dc:rights>
          <dct:modified>2023-11-02</dct:modified>
          <dct:references scheme="OGC:WMS">https://geo.example.org/wms</dct:references>
          <ows:BoundingBox crs="urn:ogc:def:crs:EPSG::4326">
            <ows:LowerCorner>45.0 10.0</ows:LowerCorner>
            <ows:UpperCorner>47.0 12.0</ows:UpperCorner>
          </ows:BoundingBox>
        </csw:Record>"#;

    fn context() -> MappingContext {
        MappingContext {
            source_name: "catalogue".to_string(),
            source_kind: "registry".to_string(),
            catalog: Catalog {
                id: "geo".to_string(),
                title: "Geo".to_string(),
                publisher: Some("Survey Agency".to_string()),
            },
            language: "en".to_string(),
            default_crs: None,
            harvested_at: Utc::now(),
        }
    }

    fn client() -> CswClient {
        let http = HttpFetcher::new(&HttpConfig::default(), None, None).unwrap();
        CswClient::new("https://geo.example.org/csw?tenant=a", http, Arc::new(Codelists::new()))
            .unwrap()
    }

    #[test]
    fn test_records_url_is_one_based() {
        let cursor = PagingCursor {
            start_position: 100,
            ..PagingCursor::new(CSW_RECORD, 50)
        };
        let url = client()
            .with_constraint(Some("AnyText LIKE '%road%'".to_string()))
            .records_url(&cursor);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("tenant".to_string(), "a".to_string())));
        assert!(pairs.contains(&("startPosition".to_string(), "101".to_string())));
        assert!(pairs.contains(&("maxRecords".to_string(), "50".to_string())));
        assert!(pairs.contains(&("constraint".to_string(), "AnyText LIKE '%road%'".to_string())));
    }

    #[test]
    fn test_map_dublin_core_record() {
        let record = parse_document(RECORD).unwrap();
        let codelists = Codelists::new();
        let ctx = context();
        let mapper = CswMapper::new(record, &ctx, &codelists);

        assert_eq!(mapper.identifier(), "urn:uuid:5a6c");
        assert!(!mapper.should_be_skipped());

        let doc = mapper.create_document().unwrap();
        assert_eq!(doc.title, "Protected areas");
        assert_eq!(doc.description.as_deref(), Some("Nature reserves of the region."));
        assert_eq!(doc.keywords, vec!["environment", "protected sites"]);
        assert_eq!(
            doc.license.as_deref(),
            Some("Creative Commons Attribution 4.0 International")
        );
        assert_eq!(doc.publisher.as_deref(), Some("Survey Agency"));
        assert_eq!(doc.modified, Some("2023-11-02T00:00:00Z".parse().unwrap()));
        assert_eq!(doc.distributions.len(), 1);
        assert_eq!(doc.distributions[0].format.as_deref(), Some("OGC:WMS"));

        let spatial = doc.spatial.unwrap();
        assert_eq!(
            spatial.bounding_box,
            Geometry::Envelope {
                min: Coord::new(10.0, 45.0),
                max: Coord::new(12.0, 47.0),
            }
        );
        assert_eq!(spatial.crs_used, "urn:ogc:def:crs:EPSG::4326");
    }

    #[test]
    fn test_original_text_keeps_source_markup() {
        let response = parse_document(&format!(
            r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2">
                 <csw:SearchResults numberOfRecordsMatched="1">{}</csw:SearchResults>
               </csw:GetRecordsResponse>"#,
            RECORD.trim()
        ))
        .unwrap();
        let record = response.child("SearchResults").unwrap().children[0].clone();
        let codelists = Codelists::new();
        let ctx = context();
        let mapper = CswMapper::new(record, &ctx, &codelists);

        let text = mapper.original_text();
        assert!(text.starts_with("<csw:Record"));
        assert!(text.contains(r#"xmlns:dc="http://purl.org/dc/elements/1.1/""#));
        assert!(text.contains("<dc:title>Protected areas</dc:title>"));
        assert!(text.contains(r#"<ows:BoundingBox crs="urn:ogc:def:crs:EPSG::4326">"#));
    }

    #[test]
    fn test_missing_title_is_mapping_error() {
        let record = parse_document(
            "<Record><identifier>x</identifier><title> </title></Record>",
        )
        .unwrap();
        let codelists = Codelists::new();
        let ctx = context();
        let result = CswMapper::new(record, &ctx, &codelists).create_document();
        assert!(matches!(result, Err(AppError::MappingError(_))));
    }

    #[test]
    fn test_unsupported_bbox_crs_is_geometry_error() {
        let record = parse_document(
            r#"<Record><identifier>x</identifier><title>T</title>
                 <BoundingBox crs="EPSG:2056">
                   <LowerCorner>2600000 1200000</LowerCorner>
                   <UpperCorner>2601000 1201000</UpperCorner>
                 </BoundingBox></Record>"#,
        )
        .unwrap();
        let codelists = Codelists::new();
        let ctx = context();
        let result = CswMapper::new(record, &ctx, &codelists).create_document();
        assert!(matches!(result, Err(AppError::GeometryError(_))));
    }

    #[test]
    fn test_service_records_are_skipped() {
        let record = parse_document(
            "<Record><identifier>svc</identifier><title>WMS</title><type>service</type></Record>",
        )
        .unwrap();
        let codelists = Codelists::new();
        let ctx = context();
        assert!(CswMapper::new(record, &ctx, &codelists).should_be_skipped());
    }
}
