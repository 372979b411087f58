//! CKAN client for harvesting datasets from CKAN-compatible open data portals.
//!
//! A CKAN portal exposes a single crawlable resource, `package_search`, paged
//! with `start`/`rows`. Spatial coverage comes from the `spatial` extra
//! written by ckanext-spatial (a GeoJSON string in WGS84).

use std::sync::Arc;

use geoharvest_core::error::AppError;
use geoharvest_core::geometry::geojson::from_geojson;
use geoharvest_core::geometry::{GeometryInformation, TARGET_CRS};
use geoharvest_core::paging::PagingCursor;
use geoharvest_core::{
    CanonicalDocument, Codelists, Distribution, LocalizedField, Mapper, MappingContext,
    Periodicity, RawPage, ResourceDescriptor, SourceClient,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{HttpFetcher, parse_source_url};
use crate::mapping::{non_empty, parse_timestamp, resolve_license};

/// Name of the one resource a CKAN portal exposes.
pub const PACKAGE_SEARCH: &str = "package_search";

/// Generic wrapper for CKAN API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// CKAN always returns responses with the structure:
/// ```json
/// {
///     "success": bool,
///     "result": T
/// }
/// ```
#[derive(Deserialize, Debug)]
struct CkanResponse<T> {
    success: bool,
    result: T,
}

/// Response structure for CKAN package_search API.
#[derive(Deserialize, Debug)]
struct PackageSearchResult {
    count: usize,
    results: Vec<CkanDataset>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CkanTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CkanResource {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CkanOrganization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One entry of the CKAN `extras` key/value list.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CkanExtra {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Data Transfer Object for a CKAN dataset as returned by `package_search`.
///
/// The `title` and `notes` fields use [`LocalizedField`] to support both plain
/// strings and multilingual objects (e.g., `{"en": "...", "de": "..."}`).
/// Fields without a typed counterpart are captured in `other`.
///
/// # Examples
///
/// ```
/// use geoharvest_client::ckan::CkanDataset;
///
/// let json = r#"{
///     "id": "dataset-123",
///     "name": "my-dataset",
///     "title": {"en": "English Title", "de": "Deutscher Titel"},
///     "notes": "Description of the dataset",
///     "organization": {"name": "test-org", "title": "Test Org"},
///     "extras": [{"key": "frequency", "value": "monthly"}]
/// }"#;
///
/// let dataset: CkanDataset = serde_json::from_str(json).unwrap();
/// assert_eq!(dataset.id, "dataset-123");
/// assert_eq!(dataset.title.resolve("de"), "Deutscher Titel");
/// assert_eq!(dataset.extra_str("frequency").as_deref(), Some("monthly"));
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CkanDataset {
    /// Unique identifier for the dataset
    #[serde(default)]
    pub id: String,
    /// URL-friendly name/slug of the dataset
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: LocalizedField,
    pub notes: Option<LocalizedField>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub license_id: Option<String>,
    #[serde(default)]
    pub license_title: Option<String>,
    #[serde(default)]
    pub metadata_modified: Option<String>,
    #[serde(default)]
    pub organization: Option<CkanOrganization>,
    #[serde(default)]
    pub tags: Vec<CkanTag>,
    #[serde(default)]
    pub resources: Vec<CkanResource>,
    #[serde(default)]
    pub extras: Vec<CkanExtra>,
    /// All other fields returned by CKAN.
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

impl CkanDataset {
    /// Looks up a value among top-level fields first, then the `extras` list.
    ///
    /// Portals with the scheming extension flatten extras onto the dataset,
    /// others keep them in the key/value list.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.other
            .get(key)
            .or_else(|| self.extras.iter().find(|e| e.key == key).map(|e| &e.value))
            .filter(|v| !v.is_null())
    }

    /// Like [`extra`](Self::extra), for string values.
    pub fn extra_str(&self, key: &str) -> Option<String> {
        non_empty(self.extra(key).and_then(Value::as_str))
    }
}

/// HTTP client for interacting with CKAN open data portals.
///
/// CKAN (Comprehensive Knowledge Archive Network) is an open-source data management
/// system used by many government open data portals worldwide.
#[derive(Clone)]
pub struct CkanClient {
    http: HttpFetcher,
    base_url: Url,
    codelists: Arc<Codelists>,
    /// Solr filter query passed as `fq`.
    filter: Option<String>,
}

impl CkanClient {
    /// Creates a new CKAN client for the specified portal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSourceUrl` if the URL is invalid or not HTTP(S).
    pub fn new(
        base_url_str: &str,
        http: HttpFetcher,
        codelists: Arc<Codelists>,
    ) -> Result<Self, AppError> {
        let mut base_url = parse_source_url(base_url_str)?;
        // `join` replaces the last path segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            codelists,
            filter: None,
        })
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn action_url(&self, action: &str) -> Result<Url, AppError> {
        self.base_url
            .join(&format!("api/3/action/{action}"))
            .map_err(|e| AppError::InvalidUrl(e.to_string()))
    }

    /// Builds the `package_search` URL for one page.
    fn search_url(&self, cursor: &PagingCursor) -> Result<Url, AppError> {
        let mut url = self.action_url(PACKAGE_SEARCH)?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(filter) = &self.filter {
                pairs.append_pair("fq", filter);
            }
            pairs
                .append_pair("rows", &cursor.page_size.to_string())
                .append_pair("start", &cursor.start_position.to_string())
                .append_pair("sort", "metadata_modified asc");
        }
        Ok(url)
    }
}

impl SourceClient for CkanClient {
    type Record = CkanDataset;

    async fn discover(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        let url = self.action_url("status_show")?;
        let status: CkanResponse<Value> = self
            .http
            .get_json(&url)
            .await
            .map_err(|e| AppError::CapabilitiesError(format!("{url}: {e}")))?;

        if !status.success {
            return Err(AppError::CapabilitiesError(format!(
                "{url}: CKAN status_show returned success: false"
            )));
        }

        tracing::debug!(
            portal = %self.base_url,
            version = status.result.get("ckan_version").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "CKAN portal reachable"
        );
        Ok(vec![ResourceDescriptor::new(PACKAGE_SEARCH)])
    }

    async fn fetch_page(
        &self,
        _resource: &ResourceDescriptor,
        cursor: &PagingCursor,
    ) -> Result<RawPage<CkanDataset>, AppError> {
        let url = self.search_url(cursor)?;
        let response: CkanResponse<PackageSearchResult> = self.http.get_json(&url).await?;

        if !response.success {
            return Err(AppError::ClientError(
                "CKAN package_search returned success: false".to_string(),
            ));
        }

        Ok(RawPage {
            records: response.result.results,
            number_matched: Some(response.result.count),
        })
    }

    fn record_identifier(&self, record: &CkanDataset) -> Option<String> {
        non_empty(Some(&record.id))
    }

    fn create_mapper<'a>(
        &'a self,
        record: CkanDataset,
        _resource: &'a ResourceDescriptor,
        context: &'a MappingContext,
    ) -> Box<dyn Mapper + 'a> {
        Box::new(CkanMapper {
            dataset: record,
            context,
            codelists: &self.codelists,
            portal_url: self.base_url.as_str(),
        })
    }
}

// =============================================================================
// Mapper
// =============================================================================

/// Maps a [`CkanDataset`] into a canonical document.
pub struct CkanMapper<'a> {
    dataset: CkanDataset,
    context: &'a MappingContext,
    codelists: &'a Codelists,
    portal_url: &'a str,
}

impl<'a> CkanMapper<'a> {
    pub fn new(
        dataset: CkanDataset,
        context: &'a MappingContext,
        codelists: &'a Codelists,
        portal_url: &'a str,
    ) -> Self {
        Self {
            dataset,
            context,
            codelists,
            portal_url,
        }
    }

    fn language(&self) -> &str {
        &self.context.language
    }

    /// Some portals (e.g., opendata.swiss) store the description in a
    /// "description" field instead of "notes".
    fn description(&self) -> Option<String> {
        self.dataset
            .notes
            .as_ref()
            .and_then(|n| n.resolve_non_empty(self.language()))
            .or_else(|| {
                self.dataset
                    .extra("description")
                    .and_then(|v| serde_json::from_value::<LocalizedField>(v.clone()).ok())
                    .and_then(|f| f.resolve_non_empty(self.language()))
            })
    }

    fn keywords(&self) -> Vec<String> {
        self.dataset
            .tags
            .iter()
            .filter_map(|t| non_empty(t.display_name.as_deref()).or_else(|| non_empty(Some(&t.name))))
            .collect()
    }

    fn license(&self) -> Option<String> {
        match non_empty(self.dataset.license_id.as_deref()) {
            Some(id) => match self.codelists.license_title(&id) {
                Some(title) => Some(title.to_string()),
                None => non_empty(self.dataset.license_title.as_deref()).or(Some(id)),
            },
            None => self
                .dataset
                .license_title
                .as_deref()
                .and_then(|t| resolve_license(self.codelists, t)),
        }
    }

    fn periodicity(&self) -> Periodicity {
        ["frequency", "accrual_periodicity", "update_frequency"]
            .iter()
            .find_map(|key| self.dataset.extra_str(key))
            .map(|code| Periodicity::from_code(&code))
            .unwrap_or_default()
    }

    fn distributions(&self) -> Vec<Distribution> {
        self.dataset
            .resources
            .iter()
            .filter_map(|r| {
                Some(Distribution {
                    url: non_empty(r.url.as_deref())?,
                    format: non_empty(r.format.as_deref()),
                    title: non_empty(r.name.as_deref()),
                })
            })
            .collect()
    }

    fn spatial(&self) -> Result<Option<GeometryInformation>, AppError> {
        let Some(value) = self.dataset.extra("spatial") else {
            return Ok(None);
        };
        // ckanext-spatial stores the GeoJSON as a string.
        let geojson = match value {
            Value::String(text) if text.trim().is_empty() => return Ok(None),
            Value::String(text) => serde_json::from_str(text)?,
            other => other.clone(),
        };
        let geometry = from_geojson(&geojson)?;
        Ok(Some(GeometryInformation::from_geometry(geometry, TARGET_CRS)?))
    }

    fn landing_page(&self) -> String {
        format!(
            "{}/dataset/{}",
            self.portal_url.trim_end_matches('/'),
            self.dataset.name
        )
    }
}

impl Mapper for CkanMapper<'_> {
    fn identifier(&self) -> &str {
        &self.dataset.id
    }

    fn create_document(&self) -> Result<CanonicalDocument, AppError> {
        let title = self
            .dataset
            .title
            .resolve_non_empty(self.language())
            .ok_or_else(|| {
                AppError::MappingError(format!("dataset {} has no title", self.dataset.id))
            })?;

        let mut extras = std::collections::BTreeMap::new();
        extras.insert("landing_page".to_string(), self.landing_page());
        if !self.dataset.name.is_empty() {
            extras.insert("name".to_string(), self.dataset.name.clone());
        }

        Ok(CanonicalDocument {
            dedup_key: self
                .dataset
                .extra_str("guid")
                .or_else(|| self.dataset.extra_str("identifier")),
            title,
            description: self.description(),
            keywords: self.keywords(),
            license: self.license(),
            periodicity: self.periodicity(),
            publisher: self
                .dataset
                .organization
                .as_ref()
                .and_then(|o| non_empty(o.title.as_deref()).or_else(|| non_empty(o.name.as_deref())))
                .or_else(|| self.context.catalog.publisher.clone()),
            modified: self
                .dataset
                .metadata_modified
                .as_deref()
                .and_then(parse_timestamp),
            distributions: self.distributions(),
            spatial: self.spatial()?,
            deleted: self.dataset.state.as_deref() == Some("deleted"),
            extras,
            ..Default::default()
        })
    }

    fn original_text(&self) -> String {
        serde_json::to_string(&self.dataset).unwrap_or_default()
    }

    /// Drafts are never published.
    fn should_be_skipped(&self) -> bool {
        self.dataset.state.as_deref() == Some("draft")
    }
}
